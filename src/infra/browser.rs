//! Launching preview URLs in the user's browser.

use std::process::{Command, Stdio};

use tracing::debug;

use crate::application::repos::{BrowserLauncher, LaunchError};
use crate::config::BrowserSettings;

const URL_PLACEHOLDER: &str = "{url}";

/// Spawns either the configured command or the platform opener.
#[derive(Debug, Clone, Default)]
pub struct SystemBrowser {
    command: Vec<String>,
}

impl SystemBrowser {
    pub fn new(settings: &BrowserSettings) -> Self {
        Self {
            command: settings.command.clone(),
        }
    }

    /// Program and arguments that open `url`.
    pub fn command_line(&self, url: &str) -> Vec<String> {
        if self.command.is_empty() {
            return platform_opener(url);
        }
        self.command
            .iter()
            .map(|arg| arg.replace(URL_PLACEHOLDER, url))
            .collect()
    }
}

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), LaunchError> {
        let argv = self.command_line(url);
        let Some((program, args)) = argv.split_first() else {
            return Err(LaunchError::EmptyCommand);
        };

        debug!(
            target = "livemark::browser",
            program = %program,
            args = ?args,
            "Launching browser"
        );

        // The child is not waited on; it outlives the request.
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(drop)
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })
    }
}

#[cfg(target_os = "macos")]
fn platform_opener(url: &str) -> Vec<String> {
    vec!["open".to_string(), url.to_string()]
}

#[cfg(target_os = "windows")]
fn platform_opener(url: &str) -> Vec<String> {
    vec![
        "cmd".to_string(),
        "/C".to_string(),
        "start".to_string(),
        String::new(),
        url.to_string(),
    ]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_opener(url: &str) -> Vec<String> {
    vec!["xdg-open".to_string(), url.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser(command: &[&str]) -> SystemBrowser {
        SystemBrowser::new(&BrowserSettings {
            command: command.iter().map(|arg| (*arg).to_string()).collect(),
        })
    }

    #[test]
    fn url_placeholder_is_substituted_in_every_argument() {
        let browser = browser(&["firefox", "--new-tab", "{url}", "--title={url}"]);
        let argv = browser.command_line("http://localhost:51004/view/1");

        assert_eq!(
            argv,
            vec![
                "firefox",
                "--new-tab",
                "http://localhost:51004/view/1",
                "--title=http://localhost:51004/view/1",
            ]
        );
    }

    #[test]
    fn empty_command_falls_back_to_platform_opener() {
        let argv = browser(&[]).command_line("http://x");
        assert_eq!(argv.last().map(String::as_str), Some("http://x"));
        assert!(argv.len() >= 2);
    }

    #[test]
    fn missing_program_is_reported_as_spawn_error() {
        let browser = browser(&["livemark-no-such-browser-binary", "{url}"]);
        let err = browser.open("http://x").unwrap_err();

        assert!(matches!(err, LaunchError::Spawn { ref program, .. } if program == "livemark-no-such-browser-binary"));
    }
}
