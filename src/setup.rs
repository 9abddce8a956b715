//! Interactive API key setup (`talkback set-key`)

use dialoguer::{Confirm, Password};
use secrecy::ExposeSecret;

use crate::db::KeyStore;

/// Prompt for the API key and store it
///
/// # Errors
///
/// Returns error if user input fails or the key cannot be stored
pub fn run_set_key(store: &KeyStore) -> anyhow::Result<()> {
    println!("Talkback API key setup\n");

    if let Some(existing) = store.get()? {
        let hint = mask(existing.expose_secret());
        let replace = Confirm::new()
            .with_prompt(format!("A key is already stored ({hint}). Replace it?"))
            .default(false)
            .interact()?;
        if !replace {
            println!("Keeping the stored key.");
            return Ok(());
        }
    }

    let key = Password::new()
        .with_prompt("Anthropic API key")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("key must not be empty")
            } else {
                Ok(())
            }
        })
        .interact()?;

    store.set(&key)?;
    println!("\nAPI key saved.");
    Ok(())
}

/// Remove the stored key after confirmation
///
/// # Errors
///
/// Returns error if user input fails or the key cannot be removed
pub fn run_remove_key(store: &KeyStore) -> anyhow::Result<()> {
    if store.get()?.is_none() {
        println!("No API key is stored.");
        return Ok(());
    }

    let confirmed = Confirm::new()
        .with_prompt("Remove the stored API key?")
        .default(false)
        .interact()?;
    if confirmed {
        store.remove()?;
        println!("API key removed.");
    }
    Ok(())
}

/// Show only the last four characters of a key
fn mask(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{tail}")
}
