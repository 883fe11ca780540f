// coedit-common: wire vocabulary and domain types shared by client and server.

pub mod normalize;
pub mod protocol;
pub mod reactions;
pub mod types;
