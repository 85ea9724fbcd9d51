// Contract types for an external HTTP/authorization layer. This crate
// exports the permission vocabulary an authorizer grants against; it does
// not implement the authorizer or the server itself.

/// A permission an authorizer may grant for a request against a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    Delete,
    /// Caps an incoming upload at `n` bytes, corresponding to wrapping the
    /// upload stream in `.write_limited(n)`.
    MaxSize(u64),
    ListFilesShallow,
    ListFilesDeep,
    ListFilesAll,
}
