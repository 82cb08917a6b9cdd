// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `harvest <command>`: the command-line front end over [`AuthClient`].

use std::sync::Arc;

use reqwest::Method;

use crate::config::{Cli, ClientConfig, Command};
use crate::context::AuthContext;
use crate::error::ApiError;
use crate::pipeline::{ApiRequest, AuthClient};
use crate::session::CliNavigator;
use crate::store::{CredentialStore, FileScope};

/// File holding session-only credentials, under the session directory.
pub const SESSION_FILE: &str = "session.json";

/// File holding remembered credentials, under the state directory.
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Open the file-backed credential store for a configuration.
pub fn open_store(config: &ClientConfig) -> CredentialStore {
    let ephemeral = FileScope::new(config.session_dir().join(SESSION_FILE));
    let persistent = FileScope::new(config.state_dir().join(CREDENTIALS_FILE));
    CredentialStore::new(Arc::new(ephemeral), Arc::new(persistent))
}

/// Turn `request` arguments into an [`ApiRequest`].
pub fn build_request(method: &str, path: &str, data: Option<&str>) -> Result<ApiRequest, ApiError> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ApiError::InvalidRequest(format!("unknown method: {method}")))?;
    let mut request = ApiRequest::new(method, path);
    if let Some(raw) = data {
        let body = serde_json::from_str(raw)
            .map_err(|e| ApiError::InvalidRequest(format!("--data is not JSON: {e}")))?;
        request = request.with_body(body);
    }
    Ok(request)
}

/// Run one command. Returns a process exit code.
pub async fn run(cli: Cli) -> i32 {
    let store = Arc::new(open_store(&cli.config));
    let navigator = Arc::new(CliNavigator::new("/"));
    let client = match AuthClient::new(cli.config, Arc::clone(&store), navigator) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 2;
        }
    };

    match cli.command {
        Command::Login { email, password, remember } => {
            cmd_login(&client, &email, &password, remember).await
        }
        Command::Logout => {
            client.logout();
            println!("Signed out.");
            0
        }
        Command::Status => cmd_status(store),
        Command::Refresh => cmd_refresh(&client).await,
        Command::Request { method, path, data } => {
            cmd_request(&client, &method, &path, data.as_deref()).await
        }
    }
}

fn report(e: &ApiError) -> i32 {
    eprintln!("error: {e}");
    match e {
        ApiError::InvalidRequest(_) => 2,
        _ => 1,
    }
}

async fn cmd_login(client: &AuthClient, email: &str, password: &str, remember: bool) -> i32 {
    match client.login(email, password, remember).await {
        Ok(bundle) => {
            let who = bundle.full_name.as_deref().unwrap_or(email);
            match bundle.role {
                Some(ref role) => println!("Signed in as {who} ({role})."),
                None => println!("Signed in as {who}."),
            }
            if !remember {
                println!("Session-only login: credentials are dropped when this session ends.");
            }
            0
        }
        Err(e) => report(&e),
    }
}

fn cmd_status(store: Arc<CredentialStore>) -> i32 {
    let ctx = AuthContext::load(store);
    let Some(bundle) = ctx.current() else {
        println!("Not signed in.");
        return 1;
    };
    println!("{:<12} {}", "USER", bundle.full_name.as_deref().unwrap_or("?"));
    println!("{:<12} {}", "ROLE", bundle.role.as_deref().unwrap_or("?"));
    println!("{:<12} {}", "REMEMBERED", if bundle.is_remembered() { "yes" } else { "no" });
    match bundle.expires_at.and_then(crate::store::format_expiry) {
        Some(at) => println!("{:<12} {at}", "EXPIRES"),
        None => println!("{:<12} unknown", "EXPIRES"),
    }
    0
}

async fn cmd_refresh(client: &AuthClient) -> i32 {
    match client.coordinator().refresh().await {
        Ok(_) => {
            println!("Token refreshed.");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

async fn cmd_request(client: &AuthClient, method: &str, path: &str, data: Option<&str>) -> i32 {
    let request = match build_request(method, path, data) {
        Ok(r) => r,
        Err(e) => return report(&e),
    };
    match client.send(request).await {
        Ok(resp) => {
            let data = resp.into_data();
            match serde_json::to_string_pretty(&data) {
                Ok(text) => println!("{text}"),
                Err(_) => println!("{data}"),
            }
            0
        }
        Err(e) => report(&e),
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
