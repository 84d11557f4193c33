//! XML Signature support.
//!
//! Messages and assertions carry an enveloped `ds:Signature` placed right
//! after their `Issuer`. The signed reference is the whole element, minus
//! the signature itself, in exclusive canonical form
//! ([`crate::xml::XmlElement::canonicalize_enveloped`]).
//! Redirect-binding messages are signed over their query string instead.

mod signer;
mod validator;

pub use signer::XmlSigner;
pub use validator::{has_enveloped_signature, verify_enveloped, verify_query};
