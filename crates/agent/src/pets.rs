use serde::{Deserialize, Serialize};

pub const PET_PROFILES_PATH: &str = "/account/pet-profiles";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PetType {
    Dog,
    Reptile,
    Bird,
    Cat,
    #[serde(other)]
    Other,
}

impl PetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dog => "dog",
            Self::Reptile => "reptile",
            Self::Bird => "bird",
            Self::Cat => "cat",
            Self::Other => "other",
        }
    }
}

/// One selectable pet returned by the account directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetProfile {
    pub key: String,
    #[serde(default)]
    pub customer_id: String,
    pub name: String,
    pub pet_type: PetType,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub primary_breed: Option<String>,
}

impl PetProfile {
    /// Label shown in the pet list, e.g. `Rex (dog)`.
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.name, self.pet_type.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PetDirectoryResponse {
    #[serde(default)]
    pub data: Option<Vec<PetProfile>>,
}

pub(crate) fn parse_pet_directory(payload: &str) -> serde_json::Result<Vec<PetProfile>> {
    let response = serde_json::from_str::<PetDirectoryResponse>(payload)?;
    Ok(response.data.unwrap_or_default())
}
