use crate::storage::KeyValueStore;
use log::{error, info};
use std::sync::{Arc, Mutex};

pub const TOKEN_KEY: &str = "token";
pub const USER_ID_KEY: &str = "userId";
pub const USERNAME_KEY: &str = "username";

pub const LOGIN_ROUTE: &str = "/login";

/// Bearer credentials issued by the backend, kept in local storage.
#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn KeyValueStore>,
}

impl Credentials {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored token, if any. Blank tokens count as absent.
    pub fn token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                error!("Failed to read auth token: {}", e);
                None
            }
        }
    }

    pub fn user_id(&self) -> Option<String> {
        self.store.get(USER_ID_KEY).ok().flatten()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token().is_some()
    }

    pub fn set(&self, token: &str, user_id: Option<&str>, username: Option<&str>) {
        let writes = [
            (TOKEN_KEY, Some(token)),
            (USER_ID_KEY, user_id),
            (USERNAME_KEY, username),
        ];
        for (key, value) in writes {
            if let Some(value) = value {
                if let Err(e) = self.store.set(key, value) {
                    error!("Failed to store {}: {}", key, e);
                }
            }
        }
    }

    pub fn clear(&self) {
        for key in [TOKEN_KEY, USER_ID_KEY, USERNAME_KEY] {
            if let Err(e) = self.store.remove(key) {
                error!("Failed to remove {}: {}", key, e);
            }
        }
    }
}

/// Client-side routing, used to send the user to the login view.
pub trait Navigator: Send + Sync {
    fn current_route(&self) -> String;

    fn navigate(&self, route: &str);
}

/// Navigator that only records the current route.
pub struct RouteState {
    current: Mutex<String>,
}

impl RouteState {
    pub fn new(initial: &str) -> Self {
        Self {
            current: Mutex::new(initial.to_string()),
        }
    }
}

impl Navigator for RouteState {
    fn current_route(&self) -> String {
        self.current.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn navigate(&self, route: &str) {
        info!("Navigating to {}", route);
        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = route.to_string();
    }
}

/// Reaction to a 401 from any backend call: drop the credentials and send the
/// user to the login route unless they are already there.
#[derive(Clone)]
pub struct AuthGuard {
    credentials: Credentials,
    navigator: Arc<dyn Navigator>,
}

impl AuthGuard {
    pub fn new(credentials: Credentials, navigator: Arc<dyn Navigator>) -> Self {
        Self { credentials, navigator }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn on_unauthorized(&self) {
        info!("Received 401, clearing stored credentials");
        self.credentials.clear();
        if self.navigator.current_route() != LOGIN_ROUTE {
            self.navigator.navigate(LOGIN_ROUTE);
        }
    }
}
