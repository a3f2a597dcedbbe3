//! Small helpers for reading typed values out of the process environment, falling back to a
//! default when the variable is unset or fails to parse.

use std::env;
use std::fmt::Debug;
use std::str::FromStr;

/// Returns the value of `key` parsed as `T`, or `default` if the variable is unset.
///
/// # Examples
/// ```
/// use ledger_utils::config::env2var_or;
///
/// let timeout: u64 = env2var_or("LEDGER_ACCEPT_TIMEOUT_MS", 1000);
/// assert!(timeout > 0);
/// ```
pub fn env2var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    <T as FromStr>::Err: Debug,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("can't parse {} into desired type", key)),
        Err(_) => default,
    }
}

/// Returns the value of `key`, or `default` if unset.
pub fn env_str_or<'a>(key: &str, default: &'a str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}
