use vetchat_agent::{ChatGateway, PetProfile, UNSPECIFIED_PET_KEY};

use crate::chat::events::PetChanged;
use crate::session::Session;

pub const UNSPECIFIED_LABEL: &str = "No specific pet";

/// One selectable entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PetOption {
    pub key: String,
    pub label: String,
}

/// Pets available to the signed-in account plus the current choice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PetSelector {
    pets: Vec<PetProfile>,
    selected: Option<String>,
    loading: bool,
    error: Option<String>,
}

impl PetSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pets(&self) -> &[PetProfile] {
        &self.pets
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Inline error from the last fetch.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Reloads the list for the current session. Never fails; errors stay inline.
    pub async fn refresh(&mut self, gateway: &dyn ChatGateway, session: &Session) {
        let Some(credential) = session.credential() else {
            self.pets.clear();
            self.selected = None;
            self.error = None;
            return;
        };

        self.loading = true;
        self.error = None;
        let result = gateway.fetch_pets(&credential).await;
        self.loading = false;

        match result {
            Ok(pets) => {
                tracing::debug!(count = pets.len(), "loaded pet directory");
                self.set_pets(pets);
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to load pet directory");
                self.pets.clear();
                self.error = Some(error.to_string());
            }
        }
    }

    pub fn set_pets(&mut self, pets: Vec<PetProfile>) {
        self.pets = pets;

        if let Some(selected) = self.selected.as_deref()
            && selected != UNSPECIFIED_PET_KEY
            && !self.pets.iter().any(|pet| pet.key == selected)
        {
            self.selected = None;
        }
    }

    /// Accepts a pet key or the `unspecified` sentinel; anything else is ignored.
    pub fn select(&mut self, key: &str) -> Option<PetChanged> {
        let key = key.trim();
        let known = key == UNSPECIFIED_PET_KEY || self.pets.iter().any(|pet| pet.key == key);
        if !known {
            tracing::debug!(pet_key = %key, "ignoring unknown pet key");
            return None;
        }

        self.selected = Some(key.to_string());
        Some(PetChanged {
            pet_key: self.selected.clone(),
        })
    }

    /// Takes `key` as the choice before the directory is known. The next `set_pets` drops it
    /// if the account has no such pet.
    pub fn preselect(&mut self, key: &str) -> PetChanged {
        let key = key.trim();
        self.selected = (!key.is_empty()).then(|| key.to_string());
        PetChanged {
            pet_key: self.selected.clone(),
        }
    }

    /// The current choice as a change to hand to the controller.
    pub fn selection(&self) -> PetChanged {
        PetChanged {
            pet_key: self.selected.clone(),
        }
    }

    /// `unspecified` first, then the fetched pets in order.
    pub fn options(&self) -> Vec<PetOption> {
        std::iter::once(PetOption {
            key: UNSPECIFIED_PET_KEY.to_string(),
            label: UNSPECIFIED_LABEL.to_string(),
        })
        .chain(self.pets.iter().map(|pet| PetOption {
            key: pet.key.clone(),
            label: pet.display_label(),
        }))
        .collect()
    }
}
