#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Messages exchanged between hopctl peers, and the framed codec that carries them.

pub mod codec;
mod message;

pub use codec::{Codec, Error};
pub use message::*;
