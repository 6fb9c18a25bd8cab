//! Snapshot of the signed-in account.

use super::transport::Account;

/// Who the client is signed in as.
///
/// Built once after login. The phone number of the raw account record is
/// not carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: i64,
    is_bot: bool,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

impl Identity {
    /// Takes a snapshot of an account record, dropping its phone number.
    #[must_use]
    pub fn from_account(account: Account) -> Self {
        let Account {
            id,
            is_bot,
            username,
            first_name,
            last_name,
            phone: _,
        } = account;

        Self {
            id,
            is_bot,
            username,
            first_name,
            last_name,
        }
    }

    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub const fn is_bot(&self) -> bool {
        self.is_bot
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Full name of the account.
    #[must_use]
    pub fn full_name(&self) -> String {
        display_name(
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            self.username.as_deref(),
        )
    }

    /// Public label: `@username` for bots, the full name otherwise.
    #[must_use]
    pub fn display(&self) -> String {
        match (self.is_bot, self.username.as_deref()) {
            (true, Some(username)) => format!("@{username}"),
            _ => self.full_name(),
        }
    }
}

/// Composes a human-readable name from profile fields.
#[must_use]
pub fn display_name(first: Option<&str>, last: Option<&str>, username: Option<&str>) -> String {
    let name = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if !name.is_empty() {
        return name;
    }

    username
        .filter(|u| !u.is_empty())
        .map_or_else(|| "Deleted Account".to_owned(), |u| format!("@{u}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            id: 777,
            is_bot: false,
            username: Some("someone".to_owned()),
            first_name: Some("Ada".to_owned()),
            last_name: Some("Lovelace".to_owned()),
            phone: Some("+15550001111".to_owned()),
        }
    }

    #[test]
    fn test_phone_is_dropped() {
        let identity = Identity::from_account(account());
        assert!(!format!("{identity:?}").contains("5550001111"));
        assert_eq!(identity.id(), 777);
    }

    #[test]
    fn test_user_display_is_full_name() {
        let identity = Identity::from_account(account());
        assert_eq!(identity.display(), "Ada Lovelace");
    }

    #[test]
    fn test_bot_display_is_handle() {
        let identity = Identity::from_account(Account {
            is_bot: true,
            username: Some("helper_bot".to_owned()),
            ..account()
        });
        assert_eq!(identity.display(), "@helper_bot");
    }

    #[test]
    fn test_display_name_fallbacks() {
        assert_eq!(display_name(Some(" Ada "), None, None), "Ada");
        assert_eq!(display_name(None, Some(""), Some("ada")), "@ada");
        assert_eq!(display_name(None, None, None), "Deleted Account");
    }
}
