//! Low-level packet access and construction.
//!
//! Every type in this module is a thin view over a byte buffer. The
//! lowercase wrappers ([`ipv4`], [`icmpv4`], [`udp4`], [`tcp4`]) are
//! dynamically sized types imbued onto a `[u8]`; their accessors read and
//! write header fields at fixed offsets without copying. A view is only
//! valid while its holder keeps the buffer, which matches how packets move
//! through the stack: ownership of the `Vec<u8>` transfers across each
//! channel send, and views borrow from it in between.
//!
//! Construction follows the checked/unchecked split: `new_unchecked` trusts
//! the caller (accessors may panic on short buffers), `new_checked` runs
//! `check_len` first and afterwards guarantees that no accessor panics.
//! Parsing untrusted input must go through the checked constructors; the
//! pipeline's validity filter does exactly that and drops failures.
//!
//! The transport views ([`udp4`], [`tcp4`]) wrap the *entire* IPv4 packet
//! rather than just the transport payload, because their checksums and
//! endpoint accessors need the enclosing addresses.

pub mod ip;
#[path = "ipv4.rs"]
mod ipv4_mod;
#[path = "icmpv4.rs"]
mod icmpv4_mod;
pub mod udp;
pub mod tcp;

pub use self::ip::{checksum, Address, Endpoint, Protocol};
pub use self::ipv4_mod::ipv4;
pub use self::icmpv4_mod::{icmpv4, Message};
pub use self::udp::udp4;
pub use self::tcp::{tcp4, Flags, TcpOption};
