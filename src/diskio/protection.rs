//! At-rest protection hook for spilled chunks.
//!
//! The engine never looks inside a protected buffer. It only guarantees that
//! whatever `protect` produced for a chunk is handed back to `unprotect`
//! byte-for-byte, together with the same database name.

/// Transform applied to every chunk after compression and undone before
/// decompression.
pub trait TmpDataProtector: Send + Sync {
    /// A disabled protector is skipped entirely, as if none were configured.
    fn enabled(&self) -> bool {
        true
    }

    /// Upper bound on how much `protect` may grow a buffer.
    fn additional_bytes_for_protected_buffer(&self) -> usize;

    /// Appends the protected form of `input` to `out`.
    fn protect(&self, input: &[u8], out: &mut Vec<u8>, db_name: Option<&str>)
    -> Result<(), String>;

    /// Appends the original bytes recovered from `input` to `out`.
    fn unprotect(
        &self,
        input: &[u8],
        out: &mut Vec<u8>,
        db_name: Option<&str>,
    ) -> Result<(), String>;
}
