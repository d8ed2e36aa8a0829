//! Certificate DN authentication against a DN-keyed directory.
//!
//! The strategy runs in two phases coupled only through [`SessionData`]:
//!
//! - **request**: pull the client's subject (and issuer) DN from the
//!   transport, canonicalize it, remember it, redirect to the callback;
//! - **callback**: look the DN up in the directory and turn the answer into
//!   an [`IdentityRecord`].
//!
//! # Modules
//!
//! - [`identity`]: DN extraction from peer certificates and proxy headers
//! - [`directory`]: outbound lookup client
//! - [`decode`]: JSON / XML response decoding
//! - [`info`]: payload → identity mapping, NPE heuristics
//! - [`tls`]: rustls configuration for the directory connection
//! - [`session`]: state carried between phases
//! - [`strategy`]: the phases themselves

pub mod decode;
pub mod directory;
pub mod identity;
pub mod info;
pub mod session;
pub mod strategy;
pub mod tls;

pub use decode::{JsonDecoder, Payload, ResponseDecoder, ResponseFormat, XmlDecoder};
pub use directory::{DirectoryClient, DirectoryLookup, DirectoryResponse, IdentityQuery};
pub use identity::{DnKind, IdentityExtractor, PeerCertificate, TransportInputs};
pub use info::{AttributeMapper, IdentityExtra, IdentityInfo, IdentityRecord, NameFormat};
pub use session::{FlowState, SessionData};
pub use strategy::{DiceStrategy, Redirect};
pub use tls::{TlsOptions, TlsVersion};
