// SPDX-License-Identifier: MIT OR Apache-2.0

/// Provider of strictly serialized database transactions.
///
/// Holding the associated permit makes exclusive access to the single
/// write transaction explicit. Processes acquire it with [`begin`], do
/// their writes and release it again through [`commit`] or [`rollback`].
///
/// [`begin`]: Transaction::begin
/// [`commit`]: Transaction::commit
/// [`rollback`]: Transaction::rollback
pub trait Transaction {
    type Error;

    type Permit;

    /// Begins a transaction, waiting until no other process holds one.
    fn begin(&self) -> impl Future<Output = Result<Self::Permit, Self::Error>>;

    /// Rolls back the transaction and frees the permit.
    fn rollback(&self, permit: Self::Permit)
    -> impl Future<Output = Result<(), Self::Error>>;

    /// Commits the transaction and frees the permit.
    fn commit(&self, permit: Self::Permit) -> impl Future<Output = Result<(), Self::Error>>;
}
