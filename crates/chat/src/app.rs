//! Line-oriented front end: reads prompts and slash commands, prints streamed replies.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use vetchat_agent::AgentError;

use crate::chat::{
    ChatController, ChatError, MessageStatus, PetSelector, StreamEventMapped,
    StreamEventPayload, StreamState,
};
use crate::session::{
    AuthError, FirebaseIdentity, IdentityProvider, Session, spawn_token_refresh,
};
use crate::settings::{AppSettings, SettingsError, SettingsStore};

pub const HELP_TEXT: &str = "\
commands:
  /login <email> <password>   sign in
  /signup <email> <password>  create an account and sign in
  /logout                     sign out
  /pets                       list your pets
  /pet <key>                  chat about a pet (`unspecified` for none)
  /help                       show this help
  /quit                       exit
anything else is sent to the vet assistant
Ctrl-C stops a reply, or exits at the prompt";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("terminal i/o failed on `{stage}`, {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to set up agent gateway on `{stage}`, {source}"))]
    Gateway {
        stage: &'static str,
        source: AgentError,
    },
    #[snafu(display("failed to set up identity provider on `{stage}`, {source}"))]
    Identity {
        stage: &'static str,
        source: AuthError,
    },
    #[snafu(display("failed to save settings on `{stage}`, {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Login { email: String, password: String },
    Signup { email: String, password: String },
    Logout,
    Pets,
    Pet(String),
    Help,
    Quit,
    Empty,
    Usage(&'static str),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();
    match (name, args.as_slice()) {
        ("login", [email, password]) => Command::Login {
            email: (*email).to_string(),
            password: (*password).to_string(),
        },
        ("login", _) => Command::Usage("/login <email> <password>"),
        ("signup", [email, password]) => Command::Signup {
            email: (*email).to_string(),
            password: (*password).to_string(),
        },
        ("signup", _) => Command::Usage("/signup <email> <password>"),
        ("logout", []) => Command::Logout,
        ("pets", []) => Command::Pets,
        ("pet", [key]) => Command::Pet((*key).to_string()),
        ("pet", _) => Command::Usage("/pet <key>"),
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        _ => Command::Usage("/help"),
    }
}

pub struct App<W> {
    controller: ChatController,
    pets: PetSelector,
    identity: Option<Arc<dyn IdentityProvider>>,
    refresh_interval: Duration,
    refresh_task: Option<JoinHandle<()>>,
    output: W,
}

impl<W: Write> App<W> {
    pub fn new(
        controller: ChatController,
        identity: Option<Arc<dyn IdentityProvider>>,
        refresh_interval: Duration,
        output: W,
    ) -> Self {
        Self {
            controller,
            pets: PetSelector::new(),
            identity,
            refresh_interval,
            refresh_task: None,
            output,
        }
    }

    /// Wires the agent gateway and, when an API key is configured, the identity provider.
    pub fn from_settings(settings: &AppSettings, output: W) -> AppResult<Self> {
        let gateway = vetchat_agent::create_gateway(settings.gateway_config()).context(
            GatewaySnafu {
                stage: "create-agent-gateway",
            },
        )?;

        let identity = match settings.identity.to_firebase_config() {
            Some(config) => {
                let provider = FirebaseIdentity::new(config).context(IdentitySnafu {
                    stage: "create-identity-provider",
                })?;
                Some(Arc::new(provider) as Arc<dyn IdentityProvider>)
            }
            None => {
                tracing::warn!("identity.api_key is not set, only anonymous chat is available");
                None
            }
        };

        Ok(Self::new(
            ChatController::new(gateway, Session::new()),
            identity,
            settings.identity.refresh_interval(),
            output,
        ))
    }

    pub fn controller(&self) -> &ChatController {
        &self.controller
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Chat about `pet_key` without checking it against the directory first.
    pub fn preselect_pet(&mut self, pet_key: &str) {
        let change = self.pets.preselect(pet_key);
        self.controller.apply_pet_change(change);
    }

    /// Reads lines until EOF, `/quit` or a stop signal at the prompt. `cancel` yields a fresh
    /// stop signal per wait; during a reply it stops the reply instead.
    pub async fn run<R, C, F>(&mut self, input: R, mut cancel: C) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
        C: FnMut() -> F,
        F: Future<Output = ()>,
    {
        let mut lines = input.lines();
        self.print(format_args!("{HELP_TEXT}\n"))?;
        loop {
            self.prompt()?;
            let line = tokio::select! {
                biased;
                () = cancel() => {
                    tracing::debug!("interrupted at the prompt");
                    self.print(format_args!("\n"))?;
                    break;
                }
                line = lines.next_line() => line.context(TerminalSnafu {
                    stage: "read-input-line",
                })?,
            };
            let Some(line) = line else {
                break;
            };

            let command = parse_command(&line);
            if command == Command::Quit {
                break;
            }
            self.handle(command, cancel()).await?;
        }

        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        Ok(())
    }

    pub async fn handle<F>(&mut self, command: Command, cancel: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        match command {
            Command::Empty | Command::Quit => Ok(()),
            Command::Help => self.print(format_args!("{HELP_TEXT}\n")),
            Command::Usage(usage) => self.print(format_args!("usage: {usage}\n")),
            Command::Say(text) => self.say(&text, cancel).await,
            Command::Login { email, password } => self.authenticate(&email, &password, false).await,
            Command::Signup { email, password } => self.authenticate(&email, &password, true).await,
            Command::Logout => {
                if let Some(task) = self.refresh_task.take() {
                    task.abort();
                }
                self.controller.session().sign_out();
                self.context_changed().await?;
                self.print(format_args!("signed out\n"))
            }
            Command::Pets => self.list_pets().await,
            Command::Pet(key) => match self.pets.select(&key) {
                Some(change) => {
                    self.controller.apply_pet_change(change);
                    let key = self.controller.conversation_key().to_string();
                    self.print(format_args!("now chatting in `{key}`\n"))
                }
                None => self.print(format_args!("unknown pet `{key}`, try /pets\n")),
            },
        }
    }

    async fn say<F>(&mut self, text: &str, cancel: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        let pending = match self.controller.start(text).await {
            Ok(pending) => pending,
            Err(ChatError::EmptyPrompt { .. }) => return Ok(()),
            Err(error) => return self.print(format_args!("error: {error}\n")),
        };

        let output = &mut self.output;
        let mut write_failed = None;
        let state = self
            .controller
            .drive(pending, cancel, |event: &StreamEventMapped| {
                if let StreamEventPayload::Delta(text) = &event.payload
                    && write_failed.is_none()
                {
                    write_failed = output
                        .write_all(text.as_bytes())
                        .and_then(|()| output.flush())
                        .err();
                }
            })
            .await;
        if let Some(error) = write_failed {
            return Err(error).context(TerminalSnafu {
                stage: "write-reply-delta",
            });
        }

        match state {
            StreamState::Cancelled(_) => self.print(format_args!("\n[stopped]\n")),
            StreamState::Error { message, .. } => {
                self.print(format_args!("\n[error: {message}]\n"))
            }
            _ => self.print(format_args!("\n")),
        }
    }

    async fn authenticate(&mut self, email: &str, password: &str, create: bool) -> AppResult<()> {
        let Some(provider) = self.identity.clone() else {
            return self.print(format_args!(
                "sign-in needs identity.api_key in the settings file\n"
            ));
        };

        let session = self.controller.session().clone();
        let result = if create {
            session.sign_up(provider.as_ref(), email, password).await
        } else {
            session.sign_in(provider.as_ref(), email, password).await
        };

        match result {
            Ok(identity) => {
                if let Some(task) = self.refresh_task.take() {
                    task.abort();
                }
                self.refresh_task = Some(spawn_token_refresh(
                    session,
                    provider,
                    self.refresh_interval,
                ));
                self.context_changed().await?;
                self.print(format_args!("signed in as {}\n", identity.email))
            }
            Err(error) => self.print(format_args!("sign-in failed: {error}\n")),
        }
    }

    async fn list_pets(&mut self) -> AppResult<()> {
        if !self.controller.session().is_authenticated() {
            return self.print(format_args!("sign in to see your pets\n"));
        }

        self.refresh_pets().await;
        if let Some(error) = self.pets.error() {
            let error = error.to_string();
            self.print(format_args!("could not load pets: {error}\n"))?;
        }

        let selected = self.controller.pet_key().map(str::to_string);
        for option in self.pets.options() {
            let marker = if selected.as_deref() == Some(option.key.as_str()) {
                '*'
            } else {
                ' '
            };
            self.print(format_args!("{marker} {}  {}\n", option.key, option.label))?;
        }
        Ok(())
    }

    async fn context_changed(&mut self) -> AppResult<()> {
        if self.refresh_pets().await || self.controller.sync_context() {
            tracing::debug!(key = %self.controller.conversation_key(), "conversation switched");
        }
        Ok(())
    }

    /// Reloads the directory and hands the surviving selection to the controller.
    async fn refresh_pets(&mut self) -> bool {
        self.pets
            .refresh(self.controller.gateway().as_ref(), self.controller.session())
            .await;
        self.controller.apply_pet_change(self.pets.selection())
    }

    fn prompt(&mut self) -> AppResult<()> {
        let label = match self.controller.session().email() {
            Some(email) => email,
            None => "guest".to_string(),
        };
        let pet = self
            .controller
            .pet_key()
            .map(|key| format!(" [{key}]"))
            .unwrap_or_default();
        self.print(format_args!("{label}{pet}> "))
    }

    fn print(&mut self, text: std::fmt::Arguments<'_>) -> AppResult<()> {
        self.output
            .write_fmt(text)
            .and_then(|()| self.output.flush())
            .context(TerminalSnafu {
                stage: "write-output",
            })
    }
}

/// Writes the effective settings back to the store's file.
pub fn save_settings(store: &SettingsStore) -> AppResult<()> {
    store.save().context(SettingsSnafu {
        stage: "save-settings",
    })?;
    tracing::info!(path = ?store.config_path(), "settings saved");
    Ok(())
}

/// Last assistant reply in the active conversation, for callers that print summaries.
pub fn last_reply(controller: &ChatController) -> Option<(&str, &MessageStatus)> {
    controller
        .active_conversation()?
        .messages
        .last()
        .map(|message| (message.text(), &message.status))
}
