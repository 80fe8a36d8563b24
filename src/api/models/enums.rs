use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyKind {
    #[default]
    None,
    FormData,
    UrlEncoded,
    Raw,
}

/// The four key/value child collections of an HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyValueKind {
    Header,
    SearchParam,
    BodyForm,
    BodyUrlEncoded,
}

impl KeyValueKind {
    pub const ALL: [KeyValueKind; 4] = [
        KeyValueKind::Header,
        KeyValueKind::SearchParam,
        KeyValueKind::BodyForm,
        KeyValueKind::BodyUrlEncoded,
    ];

    /// Path segment used by the routes (`/http/{id}/headers`).
    pub fn collection(self) -> &'static str {
        match self {
            KeyValueKind::Header => "headers",
            KeyValueKind::SearchParam => "params",
            KeyValueKind::BodyForm => "body-form",
            KeyValueKind::BodyUrlEncoded => "body-urlencoded",
        }
    }

    pub fn from_collection(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.collection() == segment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    fn rank(self) -> u8 {
        match self {
            Role::Owner => 3,
            Role::Admin => 2,
            Role::Member => 1,
        }
    }

    /// Whether this role satisfies `required`.
    pub fn allows(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Folder,
    Http,
    Flow,
}
