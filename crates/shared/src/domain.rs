use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(RoomId);
id_newtype!(MessageId);
id_newtype!(ImageId);

/// Display name given to a room whose creator left the field blank.
pub const DEFAULT_ROOM_NAME: &str = "たまりば";

/// Nickname stamped onto a message when the sender left theirs blank.
/// Applied at send time; an empty nickname is never stored.
pub const DEFAULT_NICKNAME: &str = "からあげ";

pub fn room_name_or_default(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_ROOM_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn nickname_or_default(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_NICKNAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Opaque write-authorization token for a room. Generated on the creating
/// device and otherwise known only to the store.
pub fn new_owner_credential() -> String {
    Uuid::new_v4().to_string()
}

pub const SLUG_CHARS: usize = 7;

/// Room address used in shared URLs: three lowercase letters, a dash, three
/// digits. Not globally unique by construction; the store's unique index is
/// the backstop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlugError {
    #[error("slug must be exactly {SLUG_CHARS} characters, got {0}")]
    BadLength(usize),
    #[error("slug must be three lowercase letters, a dash, three digits")]
    BadFormat,
}

impl Slug {
    pub fn parse(input: &str) -> Result<Self, SlugError> {
        let count = input.chars().count();
        if count != SLUG_CHARS {
            return Err(SlugError::BadLength(count));
        }
        let bytes = input.as_bytes();
        let letters = bytes[..3].iter().all(u8::is_ascii_lowercase);
        let digits = bytes[4..].iter().all(u8::is_ascii_digit);
        if !letters || bytes[3] != b'-' || !digits {
            return Err(SlugError::BadFormat);
        }
        Ok(Self(input.to_string()))
    }

    pub fn generate(rng: &mut impl Rng) -> Self {
        let mut out = String::with_capacity(SLUG_CHARS);
        for _ in 0..3 {
            out.push((b'a' + rng.random_range(0..26u8)) as char);
        }
        out.push('-');
        for _ in 0..3 {
            out.push((b'0' + rng.random_range(0..10u8)) as char);
        }
        Self(out)
    }

    pub fn random() -> Self {
        Self::generate(&mut rand::rng())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Slug {
    type Err = SlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Slug {
    type Error = SlugError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Slug> for String {
    fn from(value: Slug) -> Self {
        value.0
    }
}
