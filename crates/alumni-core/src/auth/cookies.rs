use std::sync::Arc;

use cookie::Cookie;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use reqwest::Url;
use tracing::{debug, warn};

use super::credentials::{Credential, CredentialStore};

/// Cookie jar for session-cookie deployments.
///
/// The server's httpOnly session cookies are kept in the credential record
/// so they survive restarts and are cleared together with it on logout.
/// The store is already scoped to one API origin, so cookie `Domain` and
/// `Path` attributes are not tracked. Cookies are only accepted from and
/// sent to that origin.
pub struct SessionCookieJar {
    store: Arc<dyn CredentialStore>,
    api_url: Url,
}

impl SessionCookieJar {
    pub fn new(store: Arc<dyn CredentialStore>, api_url: &Url) -> Self {
        Self {
            store,
            api_url: api_url.clone(),
        }
    }

    fn same_origin(&self, url: &Url) -> bool {
        url.origin() == self.api_url.origin()
    }
}

/// A parsed `Set-Cookie` header: the new value, or `None` for a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CookieUpdate {
    name: String,
    value: Option<String>,
}

fn parse_set_cookie(header: &str) -> Option<CookieUpdate> {
    let cookie = match Cookie::parse(header) {
        Ok(cookie) => cookie,
        Err(e) => {
            debug!(error = %e, "Ignoring malformed Set-Cookie header");
            return None;
        }
    };
    let value = cookie.value().trim_matches('"');

    Some(CookieUpdate {
        name: cookie.name().to_string(),
        value: (!is_expired(&cookie) && !value.is_empty()).then(|| value.to_string()),
    })
}

/// `Max-Age` wins over `Expires` when both are present.
fn is_expired(cookie: &Cookie<'_>) -> bool {
    if let Some(max_age) = cookie.max_age() {
        return max_age.is_zero() || max_age.is_negative();
    }
    cookie
        .expires_datetime()
        .is_some_and(|expires| expires.unix_timestamp() <= chrono::Utc::now().timestamp())
}

impl CookieStore for SessionCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        if !self.same_origin(url) {
            debug!(url = %url, "Ignoring cookies from another origin");
            return;
        }
        let updates: Vec<CookieUpdate> = cookie_headers
            .filter_map(|h| h.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();
        if updates.is_empty() {
            return;
        }
        debug!(url = %url, count = updates.len(), "Storing session cookies");

        let result = self.store.update(&|current| {
            let mut credential = current.unwrap_or_else(Credential::empty);
            for update in &updates {
                match &update.value {
                    Some(value) => {
                        credential.cookies.insert(update.name.clone(), value.clone());
                    }
                    None => {
                        credential.cookies.remove(&update.name);
                    }
                }
            }
            Some(credential)
        });
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session cookies");
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        if !self.same_origin(url) {
            return None;
        }
        let credential = match self.store.get() {
            Ok(credential) => credential?,
            Err(e) => {
                warn!(error = %e, "Failed to read session cookies");
                return None;
            }
        };
        if credential.cookies.is_empty() {
            return None;
        }
        let header = credential
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::MemoryStore;

    fn url() -> Url {
        Url::parse("http://localhost:5000/api/auth/login").unwrap()
    }

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("accessToken=abc; Path=/; HttpOnly; SameSite=Strict"),
            Some(CookieUpdate {
                name: "accessToken".to_string(),
                value: Some("abc".to_string()),
            })
        );
        assert_eq!(
            parse_set_cookie("refreshToken=; Max-Age=0; Path=/").unwrap().value,
            None
        );
        assert_eq!(parse_set_cookie("sid=x; max-age=-1").unwrap().value, None);
        assert_eq!(
            parse_set_cookie("sid=\"quoted\"; Path=/").unwrap().value.as_deref(),
            Some("quoted")
        );
        assert_eq!(parse_set_cookie("=value"), None);
        assert_eq!(parse_set_cookie("garbage"), None);
    }

    #[test]
    fn test_expires_in_the_past_deletes() {
        assert_eq!(
            parse_set_cookie("sid=gone; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT")
                .unwrap()
                .value,
            None
        );
        assert_eq!(
            parse_set_cookie("sid=live; Expires=Fri, 01 Jan 2100 00:00:00 GMT")
                .unwrap()
                .value
                .as_deref(),
            Some("live")
        );
        // Max-Age takes precedence over a stale Expires
        assert_eq!(
            parse_set_cookie("sid=live; Max-Age=3600; Expires=Thu, 01 Jan 1970 00:00:00 GMT")
                .unwrap()
                .value
                .as_deref(),
            Some("live")
        );
    }

    #[test]
    fn test_jar_stays_on_api_origin() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
        let jar = SessionCookieJar::new(store.clone(), &url());
        let elsewhere = Url::parse("https://tracker.example.com/collect").unwrap();

        jar.set_cookies(&mut [HeaderValue::from_static("sid=s1")].iter(), &url());
        assert!(jar.cookies(&url()).is_some());
        assert!(jar.cookies(&elsewhere).is_none());

        jar.set_cookies(&mut [HeaderValue::from_static("evil=1")].iter(), &elsewhere);
        assert_eq!(
            jar.cookies(&url()).unwrap(),
            HeaderValue::from_static("sid=s1")
        );
    }

    #[test]
    fn test_jar_persists_and_replays() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
        let jar = SessionCookieJar::new(store.clone(), &url());

        let headers = [
            HeaderValue::from_static("accessToken=a1; HttpOnly"),
            HeaderValue::from_static("refreshToken=r1; HttpOnly"),
        ];
        jar.set_cookies(&mut headers.iter(), &url());

        let stored = store.get().unwrap().unwrap();
        assert_eq!(stored.cookies.len(), 2);
        assert_eq!(
            jar.cookies(&url()).unwrap(),
            HeaderValue::from_static("accessToken=a1; refreshToken=r1")
        );

        // A fresh jar over the same store sees the same cookies
        let reopened = SessionCookieJar::new(store.clone(), &url());
        assert!(reopened.cookies(&url()).is_some());
    }

    #[test]
    fn test_jar_deletion_keeps_user_marker() {
        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryStore::with(Credential::empty().with_user_id(Some(4))));
        let jar = SessionCookieJar::new(store.clone(), &url());

        jar.set_cookies(&mut [HeaderValue::from_static("sid=s1")].iter(), &url());
        jar.set_cookies(
            &mut [HeaderValue::from_static("sid=; Max-Age=0")].iter(),
            &url(),
        );

        let stored = store.get().unwrap().unwrap();
        assert!(stored.cookies.is_empty());
        assert_eq!(stored.user_id, Some(4));
        assert!(jar.cookies(&url()).is_none());
    }

    #[test]
    fn test_jar_deleting_everything_clears_store() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
        let jar = SessionCookieJar::new(store.clone(), &url());

        jar.set_cookies(&mut [HeaderValue::from_static("sid=s1")].iter(), &url());
        jar.set_cookies(
            &mut [HeaderValue::from_static("sid=; Max-Age=0")].iter(),
            &url(),
        );
        assert!(store.get().unwrap().is_none());
    }
}
