// Licensed under the Apache-2.0 license

/// Boolean verification of a candidate image before any destructive
/// operation.
///
/// The cryptographic primitive is external to the boot subsystem; the
/// implementer receives the hash and signature extracted from the image
/// trailer and the key id named by the image header, and enforces whatever
/// policy the platform requires.
///
/// Returns:
///   true if every required check passes.
///   false on any structural, policy, or cryptographic failure.
pub trait SignatureVerifier {
    fn verify(&self, hash: &[u8], signature: &[u8], key_id: u8) -> bool;
}
