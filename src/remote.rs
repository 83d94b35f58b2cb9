//! Client for the remote blob endpoint.
//!
//! The whole collection travels as one encrypted envelope per user:
//! `POST {endpoint}/postNotes/user/{user}` stores it, overwriting any
//! earlier save, and `GET {endpoint}/getNotes/user/{user}` returns it
//! verbatim or 404 when nothing was saved yet. The user id in the path is
//! the only partitioning; no credential is sent.

use crate::crypto::{Codec, CryptoError, EncryptedPayload};
use crate::key_storage::KeyStorage;
use crate::logging;
use crate::nlog;
use crate::note::Note;
use crate::store::{BackendError, NoteBackend};

#[derive(Debug)]
pub enum RemoteError {
    /// The request did not complete (connection, DNS, body read).
    Http(String),
    /// The endpoint answered with a non-success status.
    Status(u16),
    Crypto(CryptoError),
    Serde(serde_json::Error),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Http(error) => write!(f, "http error: {error}"),
            RemoteError::Status(code) => write!(f, "remote store answered {code}"),
            RemoteError::Crypto(error) => write!(f, "crypto error: {error}"),
            RemoteError::Serde(error) => write!(f, "serialization error: {error}"),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<CryptoError> for RemoteError {
    fn from(error: CryptoError) -> Self {
        RemoteError::Crypto(error)
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(error: serde_json::Error) -> Self {
        RemoteError::Serde(error)
    }
}

pub struct RemoteStore<S> {
    endpoint: String,
    user_id: String,
    codec: Codec<S>,
}

impl<S: KeyStorage> RemoteStore<S> {
    pub fn new(endpoint: impl Into<String>, user_id: impl Into<String>, codec: Codec<S>) -> Self {
        Self {
            endpoint: endpoint.into(),
            user_id: user_id.into(),
            codec,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn codec(&self) -> &Codec<S> {
        &self.codec
    }

    /// The user id is percent-encoded as a single path segment.
    fn url(&self, function: &str) -> String {
        format!(
            "{}/{function}/user/{}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.user_id)
        )
    }

    pub fn upload_notes(&self, notes: &[Note]) -> Result<(), RemoteError> {
        let plaintext = serde_json::to_string(notes)?;
        nlog!(
            "upload: {} note(s), {} bytes for {}",
            notes.len(),
            plaintext.len(),
            logging::user_id(&self.user_id)
        );
        let envelope = self.codec.encrypt(&plaintext, None)?;
        let body = serde_json::to_string(&envelope)?;

        let response = ureq::post(&self.url("postNotes"))
            .set("Content-Type", "application/json")
            .send_string(&body);

        match response {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(RemoteError::Status(code)),
            Err(err) => Err(RemoteError::Http(err.to_string())),
        }
    }

    /// Download and decrypt the collection. No save yet means no notes.
    pub fn download_notes(&self) -> Result<Vec<Note>, RemoteError> {
        let response = match ureq::get(&self.url("getNotes")).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => {
                nlog!("download: no save found for {}", logging::user_id(&self.user_id));
                return Ok(Vec::new());
            }
            Err(ureq::Error::Status(code, _)) => return Err(RemoteError::Status(code)),
            Err(err) => return Err(RemoteError::Http(err.to_string())),
        };
        let body = response
            .into_string()
            .map_err(|error| RemoteError::Http(format!("read body: {error}")))?;

        let envelope: EncryptedPayload = serde_json::from_str(&body)?;
        let plaintext = self.codec.decrypt(&envelope)?;
        let notes: Vec<Note> = serde_json::from_str(&plaintext)?;

        for note in notes.iter().filter(|note| note.url.is_empty()) {
            nlog!("download: note {} has no url", logging::note_id(note.id()));
        }
        nlog!(
            "download: {} note(s) for {}",
            notes.len(),
            logging::user_id(&self.user_id)
        );
        Ok(notes)
    }
}

impl<S: KeyStorage> NoteBackend for RemoteStore<S> {
    fn pull(&self) -> Result<Vec<Note>, BackendError> {
        Ok(self.download_notes()?)
    }

    fn push(&self, notes: &[Note]) -> Result<(), BackendError> {
        Ok(self.upload_notes(notes)?)
    }
}
