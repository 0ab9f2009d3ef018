//! Terminal notification surface and browser window host.
//!
//! Alerts are written as OSC 777 sequences
//! (`ESC ] 777 ; notify ; title ; body BEL`), which terminals such as
//! rxvt-unicode, foot, WezTerm and Ghostty turn into desktop notifications.
//! Permission is an interactive y/N question on the same terminal.

use std::io::{self, Write};
use std::sync::{PoisonError, RwLock as StdRwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Alert, DeliveryError, NotificationBackend, PermissionState, WindowHost};

/// Format an OSC 777 notification sequence.
///
/// `;` and control characters are stripped from both fields so the payload
/// cannot terminate or extend the sequence.
pub fn osc777(title: &str, body: &str) -> String {
    format!("\x1b]777;notify;{};{}\x07", sanitize(title), sanitize(body))
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .filter(|c| *c != ';' && !c.is_control())
        .collect()
}

/// Notification backend writing OSC 777 alerts to stdout.
#[derive(Debug)]
pub struct TerminalBackend {
    interactive: bool,
    permission: StdRwLock<PermissionState>,
}

impl Default for TerminalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalBackend {
    /// Backend for the current process's terminal.
    pub fn new() -> Self {
        Self {
            interactive: atty::is(atty::Stream::Stdout),
            permission: StdRwLock::new(PermissionState::Default),
        }
    }

    /// Backend that already holds `permission`, e.g. from a `--yes` flag.
    pub fn with_permission(permission: PermissionState) -> Self {
        Self {
            permission: StdRwLock::new(permission),
            ..Self::new()
        }
    }

    fn set_permission(&self, state: PermissionState) {
        *self.permission.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

fn ask_yes_no(question: &str) -> io::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[async_trait]
impl NotificationBackend for TerminalBackend {
    fn is_supported(&self) -> bool {
        self.interactive
    }

    fn permission(&self) -> PermissionState {
        *self.permission.read().unwrap_or_else(PoisonError::into_inner)
    }

    async fn request_permission(&self) -> PermissionState {
        if crate::env::is_test_mode() || !atty::is(atty::Stream::Stdin) {
            log::warn!("Cannot ask for notification permission without a terminal");
            self.set_permission(PermissionState::Denied);
            return PermissionState::Denied;
        }

        let answer = tokio::task::spawn_blocking(|| {
            ask_yes_no("Show desktop notifications for new submissions?")
        })
        .await;

        let state = match answer {
            Ok(Ok(true)) => PermissionState::Granted,
            Ok(Ok(false)) => PermissionState::Denied,
            Ok(Err(e)) => {
                log::error!("Error requesting notification permission: {}", e);
                PermissionState::Denied
            }
            Err(e) => {
                log::error!("Permission prompt task failed: {}", e);
                PermissionState::Denied
            }
        };
        self.set_permission(state);
        state
    }

    async fn show(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(osc777(&alert.title, &alert.body).as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|e| DeliveryError(e.to_string()))
    }

    async fn dismiss(&self, tag: &str) -> Result<(), DeliveryError> {
        // OSC 777 has no way to retract a notification.
        log::trace!("Dismiss of {} ignored by terminal backend", tag);
        Ok(())
    }
}

/// Opens the application in the user's browser.
///
/// The browser offers no way to find an existing tab, so a tap always opens
/// a new one.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserHost;

#[async_trait]
impl WindowHost for BrowserHost {
    async fn focus_existing(&self, _url: &str) -> bool {
        false
    }

    async fn open_window(&self, url: &str) -> Result<(), DeliveryError> {
        open_browser(url).map_err(|e| DeliveryError(format!("{e:#}")))
    }
}

/// Open `url` with the platform opener.
///
/// The opener hands off to the browser and exits on its own, so the spawned
/// `Child` is dropped without waiting.
fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(url)
            .spawn()
            .context("Failed to open browser")?;
    }

    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(url)
            .spawn()
            .context("Failed to open browser")?;
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn()
            .context("Failed to open browser")?;
    }

    Ok(())
}
