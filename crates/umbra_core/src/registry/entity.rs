//! Identity of a remote-backed entity.

use umbra_memory::RemoteAddress;

/// Any local wrapper around a remote object.
///
/// Identity is the object's remote address, which is stable for the
/// object's remote lifetime.
pub trait RemoteEntity: Send + Sync {
    /// Address of the remote object this wrapper mirrors.
    fn address(&self) -> RemoteAddress;
}
