// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::client::{AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::PrivateKeyWithHashAlg;
use std::sync::Arc;

use crate::adapters::ssh::AuthenticationFailure;
use crate::app::ports::MfaPort;
use crate::app::types::{MfaPrompt, Prompt};

use super::{ClientHandler, SessionManager};

enum AuthDecision {
    Success,
    KeyboardInteractive,
    Failure,
}

fn auth_decision(result: AuthResult) -> AuthDecision {
    match result {
        AuthResult::Success => AuthDecision::Success,
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } if remaining_methods.contains(&russh::MethodKind::KeyboardInteractive) => {
            if !partial_success {
                tracing::debug!("public key rejected; falling back to keyboard-interactive");
            }
            AuthDecision::KeyboardInteractive
        }
        AuthResult::Failure { .. } => AuthDecision::Failure,
    }
}

impl SessionManager {
    /// Connects and authenticates unless a live connection exists.
    /// Keyboard-interactive prompts (MFA) are answered through `mfa`.
    pub async fn ensure_connected(&self, mfa: &dyn MfaPort) -> Result<()> {
        let mut handle_field = self.handle.lock().await;

        let needs_connect = match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        };
        if !needs_connect {
            tracing::debug!(
                "reusing connection to {}@{}",
                &self.params.username,
                &self.params.addr
            );
            return Ok(());
        }

        tracing::info!(
            "establishing connection with {}@{}",
            &self.params.username,
            &self.params.addr
        );
        let handler = ClientHandler::new(self.params.host.clone(), self.params.addr);
        let mut handle = russh::client::connect(self.config.clone(), self.params.addr, handler)
            .await
            .context("SSH connect failed")?;
        tracing::debug!(
            "established initial connection with {}@{}, proceeding with auth",
            &self.params.username,
            &self.params.addr
        );

        if let Some(path) = &self.params.identity_path {
            let key = russh::keys::load_secret_key(path, None)
                .with_context(|| format!("failed to load secret key at {}", path))?;
            let key = Arc::new(key);
            // Prefer SHA-256 for RSA if applicable (ignored for non-RSA keys)
            let pk = PrivateKeyWithHashAlg::new(
                key,
                handle.best_supported_rsa_hash().await?.flatten(),
            );
            let result = handle
                .authenticate_publickey(self.params.username.clone(), pk)
                .await?;
            match auth_decision(result) {
                AuthDecision::Success => {}
                AuthDecision::KeyboardInteractive => {
                    self.do_keyboard_interactive(&mut handle, mfa).await?;
                }
                AuthDecision::Failure => return Err(AuthenticationFailure.into()),
            }
        } else {
            self.do_keyboard_interactive(&mut handle, mfa).await?;
        }

        *handle_field = Some(handle);
        drop(handle_field);
        self.start_keepalive().await;
        Ok(())
    }

    async fn start_keepalive(&self) {
        let Some(interval) = self.config.keepalive_interval else {
            return;
        };
        let handle_clone = self.handle.clone();
        let jh = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval / 2);
            loop {
                ticker.tick().await;
                let guard = handle_clone.lock().await;
                let Some(handle) = guard.as_ref() else {
                    break;
                };
                if handle.is_closed() {
                    tracing::debug!("keepalive handle is closed");
                    break;
                }
                if let Err(e) = handle.send_keepalive(true).await {
                    tracing::debug!("error when sending a keepalive: {}", e);
                }
            }
        });
        if let Some(previous) = self.keepalive_task_handle.lock().await.replace(jh) {
            previous.abort();
        }
    }

    async fn do_keyboard_interactive(
        &self,
        handle: &mut russh::client::Handle<ClientHandler>,
        mfa: &dyn MfaPort,
    ) -> Result<()> {
        let mut ki = handle
            .authenticate_keyboard_interactive_start(
                self.params.username.clone(),
                self.params.ki_submethods.clone(),
            )
            .await
            .context("KI start failed")?;

        loop {
            match ki {
                KeyboardInteractiveAuthResponse::Success => return Ok(()),
                KeyboardInteractiveAuthResponse::Failure {
                    remaining_methods,
                    partial_success,
                } => {
                    tracing::debug!(
                        "authentication failed (partial_success={}, remaining={:?})",
                        partial_success,
                        remaining_methods
                    );
                    return Err(AuthenticationFailure.into());
                }
                KeyboardInteractiveAuthResponse::InfoRequest {
                    name,
                    instructions,
                    prompts,
                } => {
                    let prompt = MfaPrompt {
                        name,
                        instructions,
                        prompts: prompts
                            .into_iter()
                            .map(|p| Prompt {
                                text: p.prompt,
                                echo: p.echo,
                            })
                            .collect(),
                    };
                    // Servers may send an empty round to finish the exchange.
                    let responses = if prompt.prompts.is_empty() {
                        Vec::new()
                    } else {
                        mfa.answer(&prompt)
                            .await
                            .map_err(|err| anyhow!("MFA prompt failed: {err}"))?
                            .responses
                    };
                    ki = handle
                        .authenticate_keyboard_interactive_respond(responses)
                        .await
                        .context("KI respond failed")?;
                }
            }
        }
    }
}
