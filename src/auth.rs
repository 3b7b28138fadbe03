use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use directories::BaseDirs;
use url::Url;

use crate::command::Environment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub login: String,
    pub password: Option<String>,
}

/// The netrc file named by `NETRC` in `env`, else `~/.netrc`.
pub(crate) fn netrc_path(env: &Environment) -> Option<PathBuf> {
    if let Some(path) = env.get("NETRC").filter(|x| !x.is_empty()) {
        return Some(PathBuf::from(path));
    }
    if let Some(home) = env.get("HOME").filter(|x| !x.is_empty()) {
        return Some(Path::new(home).join(".netrc"));
    }
    BaseDirs::new().map(|x| x.home_dir().join(".netrc"))
}

/// Whether `machine` is mentioned anywhere in the netrc file.
pub(crate) fn netrc_mentions(path: &Path, machine: &str) -> bool {
    match std::fs::read_to_string(path) {
        Ok(v) => v.lines().any(|line| line.contains(machine)),
        Err(e) => {
            log::warn!("Could not read {:?}: {}", path, e);
            false
        }
    }
}

/// Credentials for `host` from netrc contents, falling back to a `default`
/// entry.
pub(crate) fn netrc_lookup(contents: &str, host: &str) -> Option<Credentials> {
    #[derive(Clone, Copy, PartialEq)]
    enum Entry {
        Unset,
        Host,
        Other,
        Default,
    }

    let mut tokens = contents.split_whitespace();
    let mut current = Entry::Unset;
    let mut login = None;
    let mut password = None;
    let mut fallback = None;

    let mut finish = |entry: Entry, login: Option<String>, password: Option<String>| {
        match (entry, login) {
            (Entry::Host, Some(login)) => Some(Credentials { login, password }),
            (Entry::Default, Some(login)) => {
                fallback = Some(Credentials { login, password });
                None
            }
            _ => None,
        }
    };

    while let Some(token) = tokens.next() {
        match token {
            "machine" | "default" => {
                if let Some(found) = finish(current, login.take(), password.take()) {
                    return Some(found);
                }
                current = match token {
                    "default" => Entry::Default,
                    _ if tokens.next() == Some(host) => Entry::Host,
                    _ => Entry::Other,
                };
            }
            "login" => login = tokens.next().map(str::to_string),
            "password" => password = tokens.next().map(str::to_string),
            _ => {}
        }
    }

    if let Some(found) = finish(current, login, password) {
        return Some(found);
    }
    fallback
}

/// Builds a `Cookie` header value from a Netscape-format cookie file for the
/// given URL.
pub(crate) fn cookie_header(contents: &str, url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let path = url.path();
    let secure = url.scheme() == "https";
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let pairs: Vec<String> = contents
        .lines()
        .filter_map(|line| {
            let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
            if line.starts_with('#') || line.trim().is_empty() {
                return None;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                return None;
            }
            let (domain, subdomains, cookie_path, is_secure, expiry, name, value) = (
                fields[0], fields[1], fields[2], fields[3], fields[4], fields[5], fields[6],
            );

            let bare = domain.trim_start_matches('.');
            let domain_ok = host == bare
                || ((subdomains == "TRUE" || domain.starts_with('.'))
                    && host.ends_with(&format!(".{}", bare)));
            let path_ok = path.starts_with(cookie_path);
            let secure_ok = is_secure != "TRUE" || secure;
            let expiry: u64 = expiry.parse().unwrap_or(0);
            let live = expiry == 0 || expiry > now;

            if domain_ok && path_ok && secure_ok && live {
                Some(format!("{}={}", name, value.trim_end()))
            } else {
                None
            }
        })
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
