/// Creates a [String] backed newtype for some kind of name or descriptor.
///
/// You need to have a function
/// ```no_run
/// # struct Owned;
/// impl Owned {
///     fn check_valid(inner: &str) -> anyhow::Result<()> {
///         // ...
/// # Ok(())
///     }
/// }
/// ```
/// that checks if the contents are valid.
///
/// Serialization goes through [String], so deserializing runs the validity check as well.
macro_rules! make_name {
	(
		$( #[$doc:meta] )*
		$vis:vis $name:ident;
	) => {
		$( #[$doc] )*
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
		#[serde(try_from = "String", into = "String")]
		$vis struct $name(String);

		impl $name {
			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_inner(self) -> String {
				self.0
			}

			#[doc = concat!("Constructs [`", stringify!($name), "`] without checking any content.")]
			///
			#[doc = concat!("The caller must make sure that `s` is valid, see [`", stringify!($name), "::check_valid`].")]
			pub fn new_unchecked(s: impl Into<String>) -> $name {
				let s = s.into();
				debug_assert!($name::check_valid(&s).is_ok(), "invalid {}: {s:?}", stringify!($name));
				$name(s)
			}

			/// Checks if a given value is valid for being represented by this type.
			pub fn is_valid(inner: &str) -> bool {
				$name::check_valid(inner).is_ok()
			}
		}

		impl std::fmt::Debug for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				std::fmt::Debug::fmt(&self.0, f)
			}
		}

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				std::fmt::Display::fmt(&self.0, f)
			}
		}

		impl TryFrom<String> for $name {
			type Error = anyhow::Error;

			fn try_from(value: String) -> anyhow::Result<$name> {
				use anyhow::Context;
				$name::check_valid(&value)
					.with_context(|| anyhow::anyhow!("on value {value:?}"))?;
				Ok($name(value))
			}
		}

		impl TryFrom<&str> for $name {
			type Error = anyhow::Error;

			fn try_from(value: &str) -> anyhow::Result<$name> {
				$name::try_from(value.to_owned())
			}
		}

		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}

		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}

		impl PartialEq<str> for $name {
			fn eq(&self, other: &str) -> bool {
				self.0 == other
			}
		}

		impl PartialEq<&str> for $name {
			fn eq(&self, other: &&str) -> bool {
				self.0 == *other
			}
		}
	}
}

/// Creates a flags struct of `bool`s that converts from and to the `u16` access flags of the class file format.
macro_rules! make_access_flags {
	(
		$( #[$doc:meta] )*
		$vis:vis $name:ident {
			$( $field:ident = $bit:literal => $word:literal ),* $(,)?
		}
	) => {
		$( #[$doc] )*
		#[derive(Copy, Clone, Default, Hash, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
		#[serde(from = "u16", into = "u16")]
		$vis struct $name {
			$( pub $field: bool, )*
		}

		impl std::fmt::Debug for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				f.write_str(concat!(stringify!($name), " { "))?;
				$( if self.$field { f.write_str(concat!($word, " "))?; } )*
				f.write_str("}")
			}
		}

		impl From<u16> for $name {
			fn from(value: u16) -> Self {
				$name {
					$( $field: value & $bit != 0, )*
				}
			}
		}

		impl From<$name> for u16 {
			fn from(value: $name) -> Self {
				0 $( | (if value.$field { $bit } else { 0 }) )*
			}
		}
	}
}

pub(crate) use {make_access_flags, make_name};
