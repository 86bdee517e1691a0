use secrecy::SecretString;

pub const EMAIL_VAR: &str = "SUBSTACK_EMAIL";
pub const PASSWORD_VAR: &str = "SUBSTACK_PASSWORD";

/// Login credentials. The password is only readable through `expose_secret`.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Read credentials from the environment; `None` unless both are set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let email = lookup(EMAIL_VAR).filter(|v| !v.trim().is_empty())?;
        let password = lookup(PASSWORD_VAR).filter(|v| !v.is_empty())?;
        Some(Self::new(email.trim(), password))
    }
}
