//! Inbound email pipeline.
//!
//! Every inbound email flows through:
//! 1. `encoding`: charset repair before any pattern matching
//! 2. `RecipientResolver` / `UserResolver`: routing token → account
//! 3. `BodyNormalizer`: plain and HTML cleaning
//! 4. `date`, `AttachmentSelector`, `InspirationMatcher`: entry parameters
//! 5. `EntryDecisionEngine`: merge or create, with recovery
//!
//! `EmailProcessor` wires the stages together.

pub mod attachment;
pub mod body;
pub mod date;
pub mod encoding;
pub mod entry;
pub mod inspiration;
pub mod processor;
pub mod recipient;
pub mod reply;
pub mod rfc822;
pub mod types;
pub mod user;

pub use processor::{Clock, Collaborators, EmailProcessor};
pub use types::{Address, Attachment, AttachmentData, InboundEmail, MailText, ProcessOutcome};
