//! Share codes
//!
//! A share code is the second half of a budget's credentials. Every device
//! that knows the password and the same four words lands on the same budget.

mod code;
mod transport;

pub use code::{format_for_display, normalize, validate, ShareCode, WORD_COUNT};
pub use transport::{decode, encode, encode_qr, CreatorInfo, SharePayload};
