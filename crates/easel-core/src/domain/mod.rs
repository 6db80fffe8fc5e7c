//! Domain model (request, mention, artifact, state, outcome, errors).

pub mod artifact;
pub mod errors;
pub mod mention;
pub mod outcome;
pub mod request;
pub mod state;

pub use self::artifact::{ArtifactKey, GeneratedArtifact, PNG_CONTENT_TYPE};
pub use self::errors::{ErrorKind, FulfillmentError, InvalidInput, ReceiverError};
pub use self::mention::{MentionEvent, strip_mention};
pub use self::outcome::{AttemptReport, FailureNotice};
pub use self::request::GenerationRequest;
pub use self::state::AttemptState;
