mod auth;
mod cli;
mod infra;
mod routes;
mod server;

use gatehouse::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
