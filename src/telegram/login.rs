//! Interactive phone login.

use std::io;

use dialoguer::{Input, Password};
use grammers_client::{Client, SignInError};
use tracing::{debug, info};

use super::transport::TransportError;

/// Signs in with phone number, login code and, if enabled, the 2FA password.
pub async fn interactive(client: &Client, api_hash: &str) -> Result<(), TransportError> {
    info!("Authentication required");

    let phone: String = Input::new()
        .with_prompt("Enter your phone number (with country code)")
        .interact_text()
        .map_err(prompt_error)?;

    info!("Requesting login code for phone: {}...", mask_phone(&phone));
    let token = client
        .request_login_code(&phone, api_hash)
        .await
        .map_err(|e| TransportError::classify(&e.to_string()))?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()
        .map_err(prompt_error)?;

    match client.sign_in(&token, &code).await {
        Ok(_user) => {
            info!("Successfully signed in!");
            Ok(())
        }
        Err(SignInError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");
            debug!("Password hint: {:?}", password_token.hint());

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()
                .map_err(prompt_error)?;

            client
                .check_password(password_token, password.as_str())
                .await
                .map_err(|e| TransportError::classify(&e.to_string()))?;

            info!("Successfully signed in with 2FA!");
            Ok(())
        }
        Err(SignInError::InvalidCode) => Err(TransportError::Other("Invalid login code".to_owned())),
        Err(e) => Err(TransportError::classify(&e.to_string())),
    }
}

/// A closed stdin surfaces as end of input.
fn prompt_error(err: dialoguer::Error) -> TransportError {
    match err {
        dialoguer::Error::IO(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            TransportError::UnexpectedEof
        }
        #[allow(unreachable_patterns)]
        e => TransportError::Other(format!("prompt failed: {e}")),
    }
}

/// Masks a phone number for logging (shows last 4 digits).
fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1234567890"), "***7890");
        assert_eq!(mask_phone("123"), "****");
        assert_eq!(mask_phone("+7 (999) 123-45-67"), "***4567");
    }

    #[test]
    fn test_eof_prompt_error() {
        let err = dialoguer::Error::IO(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(prompt_error(err), TransportError::UnexpectedEof));
    }
}
