// SPDX-License-Identifier: MIT

//! Small codegen helpers shared across the core types.

/// Implements `Display` by delegating to a field or expression.
///
/// ```ignore
/// simple_display!(CorruptionType, |s| match s {
///     CorruptionType::FileHashMismatch => "file_hash_mismatch",
///     ...
/// });
/// ```
#[macro_export]
macro_rules! simple_display {
    ($ty:ty, |$self:ident| $body:expr) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let $self = self;
                write!(f, "{}", $body)
            }
        }
    };
}
