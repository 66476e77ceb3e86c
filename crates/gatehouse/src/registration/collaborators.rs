//! Seams to services owned outside the registration core.

/// Validates a rendered captcha. Tokens are single use: validation consumes them.
pub trait CaptchaValidator: Send + Sync {
    fn validate(&self, token: &str, answer: &str) -> bool;
}

/// Checks the one-time code mailed to the registrant.
pub trait EmailCodeValidator: Send + Sync {
    fn check(&self, email: &str, code: &str) -> bool;
}

/// External account linking (for example a chat platform) that may be mandatory.
pub trait ExternalBindingService: Send + Sync {
    fn is_required(&self) -> bool;
    fn is_linked(&self, username: &str) -> bool;
}

/// Turns message keys into user-facing text.
pub trait MessageResolver: Send + Sync {
    fn resolve(&self, key: &str, language: &str) -> String;
}

/// Notified after a registration is approved on the spot. Must not block the caller.
pub trait ApprovalHook: Send + Sync {
    fn approved(&self, username: &str);
}

/// Binding service for deployments without an external account requirement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBindingRequired;

impl ExternalBindingService for NoBindingRequired {
    fn is_required(&self) -> bool {
        false
    }

    fn is_linked(&self, _username: &str) -> bool {
        false
    }
}
