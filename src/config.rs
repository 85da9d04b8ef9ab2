use anyhow::{anyhow, bail, Context, Error};
use getopts::{Matches, Options};
use reqwest::Client;
use std::fmt;
use std::time::Duration;

pub const AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_RESOURCE: &str = "https://api.securitycenter.microsoft.com";
pub const DEFAULT_API_URL: &str =
    "https://api.securitycenter.microsoft.com/api/advancedqueries/run";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = concat!("huntquery/", env!("CARGO_PKG_VERSION"));

pub const ENV_TENANT_ID: &str = "HUNT_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "HUNT_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "HUNT_CLIENT_SECRET";
pub const ENV_RESOURCE: &str = "HUNT_RESOURCE";
pub const ENV_TOKEN_URL: &str = "HUNT_TOKEN_URL";
pub const ENV_API_URL: &str = "HUNT_API_URL";
pub const ENV_ACCESS_TOKEN: &str = "HUNT_ACCESS_TOKEN";

/// Options shared by both binaries. A binary that passes `allow_token` to
/// [`Config::from_matches`] must also define `--token`.
pub fn options() -> Options {
    let mut opts = Options::new();
    opts.optopt("", "tenant", "directory (tenant) id", "ID");
    opts.optopt("", "client-id", "application (client) id", "ID");
    opts.optopt("", "client-secret", "client secret", "SECRET");
    opts.optopt("", "resource", "resource the token is requested for", "URI");
    opts.optopt("", "token-url", "token endpoint, overrides --tenant", "URL");
    opts.optopt("", "api-url", "advanced hunting query endpoint", "URL");
    opts.optopt("", "timeout", "per-request timeout in seconds", "SECS");
    opts.optflag("v", "verbose", "log debug output");
    opts.optflag("h", "help", "print this help");
    opts
}

/// Identity of the service principal.
#[derive(Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub token_url: String,
    pub resource: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// None only when a ready token was supplied.
    pub credentials: Option<Credentials>,
    pub endpoints: Endpoints,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Config {
    /// Resolves settings with precedence flag, then environment, then default.
    /// When `allow_token` is false a `--token` is ignored and credentials are
    /// always required.
    pub fn from_matches<F>(m: &Matches, env: F, allow_token: bool) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |flag: &str, var: &str| -> Option<String> {
            m.opt_str(flag)
                .or_else(|| env(var))
                .filter(|v| !v.trim().is_empty())
        };

        let token = if allow_token {
            lookup("token", ENV_ACCESS_TOKEN)
        } else {
            None
        };

        let tenant = lookup("tenant", ENV_TENANT_ID);
        let token_url = lookup("token-url", ENV_TOKEN_URL);

        let credentials = if token.is_some() {
            None
        } else {
            let client_id = lookup("client-id", ENV_CLIENT_ID)
                .ok_or_else(|| missing("client-id", ENV_CLIENT_ID))?;
            let client_secret = lookup("client-secret", ENV_CLIENT_SECRET)
                .ok_or_else(|| missing("client-secret", ENV_CLIENT_SECRET))?;
            // An explicit token endpoint makes the tenant optional.
            let tenant_id = match (&tenant, &token_url) {
                (Some(t), _) => t.clone(),
                (None, Some(_)) => String::new(),
                (None, None) => return Err(missing("tenant", ENV_TENANT_ID)),
            };
            Some(Credentials {
                tenant_id,
                client_id,
                client_secret,
            })
        };

        let token_url = token_url.unwrap_or_else(|| match &tenant {
            Some(t) => format!("{}/{}/oauth2/token", AUTHORITY, t),
            None => String::new(),
        });

        let timeout = match m.opt_str("timeout") {
            Some(s) => {
                let secs: u64 = s
                    .parse()
                    .with_context(|| format!("invalid --timeout {:?}", s))?;
                if secs == 0 {
                    bail!("--timeout must be positive");
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Config {
            credentials,
            endpoints: Endpoints {
                token_url,
                resource: lookup("resource", ENV_RESOURCE)
                    .unwrap_or_else(|| DEFAULT_RESOURCE.to_string()),
                api_url: lookup("api-url", ENV_API_URL)
                    .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            },
            token,
            timeout,
        })
    }

    pub fn http_client(&self) -> Result<Client, Error> {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .context("build http client")
    }
}

fn missing(flag: &str, var: &str) -> Error {
    anyhow!("missing --{} (or set {})", flag, var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(args: &[&str]) -> Matches {
        let mut opts = options();
        opts.optopt("", "token", "", "TOKEN");
        opts.parse(args).unwrap()
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn flags_override_environment() {
        let m = parse(&["--tenant", "t-flag", "--client-id", "c-flag"]);
        let env = env_of(&[
            (ENV_TENANT_ID, "t-env"),
            (ENV_CLIENT_ID, "c-env"),
            (ENV_CLIENT_SECRET, "s-env"),
        ]);
        let cfg = Config::from_matches(&m, env, true).unwrap();
        let creds = cfg.credentials.unwrap();
        assert_eq!(creds.tenant_id, "t-flag");
        assert_eq!(creds.client_id, "c-flag");
        assert_eq!(creds.client_secret, "s-env");
        assert_eq!(
            cfg.endpoints.token_url,
            "https://login.microsoftonline.com/t-flag/oauth2/token"
        );
        assert_eq!(cfg.endpoints.resource, DEFAULT_RESOURCE);
        assert_eq!(cfg.endpoints.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn missing_secret_names_flag_and_variable() {
        let m = parse(&["--tenant", "t", "--client-id", "c"]);
        let err = Config::from_matches(&m, env_of(&[]), true).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--client-secret"), "{}", msg);
        assert!(msg.contains(ENV_CLIENT_SECRET), "{}", msg);
    }

    #[test]
    fn blank_values_count_as_missing() {
        let m = parse(&["--tenant", "t", "--client-id", "  ", "--client-secret", "s"]);
        let err = Config::from_matches(&m, env_of(&[]), true).unwrap_err();
        assert!(err.to_string().contains("--client-id"));
    }

    #[test]
    fn token_skips_credentials() {
        let m = parse(&[]);
        let env = env_of(&[(ENV_ACCESS_TOKEN, "abc")]);
        let cfg = Config::from_matches(&m, env, true).unwrap();
        assert!(cfg.credentials.is_none());
        assert_eq!(cfg.token.as_deref(), Some("abc"));
    }

    #[test]
    fn token_ignored_when_not_allowed() {
        let m = parse(&["--token", "abc"]);
        let err = Config::from_matches(&m, env_of(&[]), false).unwrap_err();
        assert!(err.to_string().contains("--client-id"));
    }

    #[test]
    fn token_url_makes_tenant_optional() {
        let m = parse(&[
            "--token-url",
            "http://localhost:9/token",
            "--client-id",
            "c",
            "--client-secret",
            "s",
            "--api-url",
            "http://localhost:9/run",
            "--resource",
            "api://thing",
            "--timeout",
            "5",
        ]);
        let cfg = Config::from_matches(&m, env_of(&[]), false).unwrap();
        assert_eq!(cfg.endpoints.token_url, "http://localhost:9/token");
        assert_eq!(cfg.endpoints.api_url, "http://localhost:9/run");
        assert_eq!(cfg.endpoints.resource, "api://thing");
        assert_eq!(cfg.timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_timeout_rejected() {
        let base = ["--tenant", "t", "--client-id", "c", "--client-secret", "s"];
        for bad in &["abc", "0"] {
            let mut args = base.to_vec();
            args.push("--timeout");
            args.push(*bad);
            let m = parse(&args);
            assert!(Config::from_matches(&m, env_of(&[]), false).is_err());
        }
    }

    #[test]
    fn debug_redacts_secret() {
        let creds = Credentials {
            tenant_id: "t".into(),
            client_id: "c".into(),
            client_secret: "hunter2".into(),
        };
        let s = format!("{:?}", creds);
        assert!(!s.contains("hunter2"));
        assert!(s.contains("<redacted>"));
    }
}
