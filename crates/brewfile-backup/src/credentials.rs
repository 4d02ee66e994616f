use std::fmt;
use std::process::Command;
use std::time::Duration;

use crate::config::AuthSettings;
use crate::error::{Error, Result};
use crate::process::{find_program, run_with_timeout};

const TOKEN_URL: &str =
    "https://github.com/settings/tokens/new?scopes=gist&description=Brewfile+Backup";

/// Opaque access token. Never printed; `Debug` only shows the length.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// `None` for blank input.
    pub fn new(raw: &str) -> Option<Self> {
        let t = raw.trim();
        if t.is_empty() {
            None
        } else {
            Some(Self(t.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token([REDACTED; {} chars])", self.0.len())
    }
}

/// One place a token might come from. `None` means "unavailable, try the next source".
pub trait TokenSource {
    fn name(&self) -> String;
    fn fetch(&self) -> Option<Token>;
}

/// Helper CLI (`gh`): requires `auth status` to succeed, then reads `auth token`.
pub struct HelperCliSource {
    program: String,
    timeout: Duration,
}

impl HelperCliSource {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn run(&self, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GH_PROMPT_DISABLED", "1")
            .env("GH_NO_UPDATE_NOTIFIER", "1")
            .env("NO_COLOR", "1");
        match run_with_timeout(cmd, self.timeout) {
            Ok(out) if out.success() => Some(out.stdout),
            Ok(out) => {
                tracing::debug!(
                    program = %self.program,
                    args = ?args,
                    status = %out.status,
                    "helper CLI exited unsuccessfully"
                );
                None
            }
            Err(e) => {
                tracing::warn!(program = %self.program, "helper CLI unavailable: {e}");
                None
            }
        }
    }
}

impl TokenSource for HelperCliSource {
    fn name(&self) -> String {
        format!("{} CLI", self.program)
    }

    fn fetch(&self) -> Option<Token> {
        let Some(path) = find_program(&self.program) else {
            tracing::debug!(program = %self.program, "helper CLI not found in PATH");
            return None;
        };
        tracing::debug!(path = %path.display(), "found helper CLI");

        self.run(&["auth", "status"])?;
        let token = self.run(&["auth", "token"]).and_then(|s| Token::new(&s));
        match &token {
            Some(t) => tracing::debug!(len = t.expose().len(), "obtained token from helper CLI"),
            None => tracing::debug!("helper CLI returned no token"),
        }
        token
    }
}

pub struct EnvSource {
    var: String,
}

impl EnvSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenSource for EnvSource {
    fn name(&self) -> String {
        format!("{} environment variable", self.var)
    }

    fn fetch(&self) -> Option<Token> {
        let token = std::env::var(&self.var).ok().and_then(|v| Token::new(&v));
        match &token {
            Some(t) => tracing::debug!(
                var = %self.var,
                len = t.expose().len(),
                "found token in environment"
            ),
            None => tracing::debug!(var = %self.var, "environment variable not set or empty"),
        }
        token
    }
}

pub struct CredentialProvider {
    sources: Vec<Box<dyn TokenSource>>,
    helper: String,
    token_env: String,
}

impl CredentialProvider {
    pub fn from_settings(auth: &AuthSettings) -> Self {
        Self::with_sources(
            vec![
                Box::new(HelperCliSource::new(auth.helper.clone(), auth.timeout())),
                Box::new(EnvSource::new(auth.token_env.clone())),
            ],
            &auth.helper,
            &auth.token_env,
        )
    }

    pub fn with_sources(sources: Vec<Box<dyn TokenSource>>, helper: &str, token_env: &str) -> Self {
        Self {
            sources,
            helper: helper.to_string(),
            token_env: token_env.to_string(),
        }
    }

    /// First source that yields a non-empty token wins.
    pub fn token(&self) -> Result<Token> {
        tracing::debug!("resolving access token");
        for source in &self.sources {
            if let Some(token) = source.fetch() {
                tracing::info!("authenticated via {}", source.name());
                return Ok(token);
            }
        }
        Err(Error::auth(self.remediation()))
    }

    fn remediation(&self) -> String {
        format!(
            "GitHub authentication failed. No valid token found.\n\n\
             Please use one of the following methods:\n\n\
             1. GitHub CLI (recommended):\n   {helper} auth login --scopes gist\n\n\
             2. Environment variable:\n   export {env}='your_token_here'\n\n\
             To create a token, visit:\n{TOKEN_URL}",
            helper = self.helper,
            env = self.token_env,
        )
    }
}
