// SPDX-License-Identifier: PMPL-1.0-or-later

//! Resolution of externally sourced mask tokens

use crate::error::{RecoveryError, Result};
use crate::storage::{KeyValueStore, Scope};
use crate::types::InputType;

/// Resolve `token` to a raw bit string according to `input_type`.
pub fn resolve_input(input_type: InputType, token: &str, store: &dyn KeyValueStore) -> Result<String> {
    match input_type {
        InputType::Literal => Ok(token.to_string()),
        InputType::SharedStorage => read_shared_storage(token, store),
        InputType::Gsds => read_gsds(token, store),
        InputType::UserVar => Err(RecoveryError::NotImplemented(format!(
            "resolving input type UserVar for token [{}]",
            token
        ))),
    }
}

/// `Context.Name`, with context one of DUT, LOT, IP.
fn read_shared_storage(token: &str, store: &dyn KeyValueStore) -> Result<String> {
    let parts: Vec<&str> = token.split('.').collect();
    let [context, name] = parts.as_slice() else {
        return Err(RecoveryError::Argument(format!(
            "shared storage token [{}] must contain exactly one period, expecting Context.Name",
            token
        )));
    };
    let scope = Scope::parse(context).ok_or_else(|| {
        RecoveryError::Argument(format!(
            "shared storage token [{}] context is not DUT, LOT or IP",
            token
        ))
    })?;
    store
        .get_string(name, scope)
        .ok_or_else(|| RecoveryError::not_found("shared storage row", token))
}

/// `G.<U|L>.<S|I|D>.<name>`: unit or lot scope, string/integer/double value.
fn read_gsds(token: &str, store: &dyn KeyValueStore) -> Result<String> {
    let bad = || {
        RecoveryError::Argument(format!(
            "GSDS token [{}] is malformed, expecting G.<U|L>.<S|I|D>.<name>",
            token
        ))
    };
    let mut parts = token.splitn(4, '.');
    let (Some(prefix), Some(scope), Some(kind), Some(name)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(bad());
    };
    if !prefix.eq_ignore_ascii_case("G") || name.is_empty() {
        return Err(bad());
    }
    let scope = match scope.to_uppercase().as_str() {
        "U" => Scope::Dut,
        "L" => Scope::Lot,
        _ => return Err(bad()),
    };
    let value = match kind.to_uppercase().as_str() {
        "S" | "D" => store.get_string(name, scope),
        "I" => store.get_int(name, scope).map(|value| value.to_string()),
        _ => return Err(bad()),
    };
    value.ok_or_else(|| RecoveryError::not_found("GSDS token", token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_literal_passthrough() {
        let store = MemoryStore::new();
        assert_eq!(resolve_input(InputType::Literal, "0101", &store).expect("literal"), "0101");
    }

    #[test]
    fn test_shared_storage_tokens() {
        let mut store = MemoryStore::new();
        store.put_string("CoreMask", "0011".to_string(), Scope::Lot);
        assert_eq!(
            resolve_input(InputType::SharedStorage, "lot.CoreMask", &store).expect("row"),
            "0011"
        );
        assert!(matches!(
            resolve_input(InputType::SharedStorage, "CoreMask", &store),
            Err(RecoveryError::Argument(_))
        ));
        assert!(matches!(
            resolve_input(InputType::SharedStorage, "A.B.C", &store),
            Err(RecoveryError::Argument(_))
        ));
        assert!(matches!(
            resolve_input(InputType::SharedStorage, "WAFER.CoreMask", &store),
            Err(RecoveryError::Argument(_))
        ));
        assert!(matches!(
            resolve_input(InputType::SharedStorage, "DUT.CoreMask", &store),
            Err(RecoveryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_gsds_tokens() {
        let mut store = MemoryStore::new();
        store.put_string("Mask", "110".to_string(), Scope::Dut);
        assert_eq!(resolve_input(InputType::Gsds, "G.U.S.Mask", &store).expect("gsds"), "110");
        assert!(matches!(
            resolve_input(InputType::Gsds, "G.X.S.Mask", &store),
            Err(RecoveryError::Argument(_))
        ));
        assert!(matches!(
            resolve_input(InputType::Gsds, "G.L.S.Mask", &store),
            Err(RecoveryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_user_var_not_implemented() {
        let store = MemoryStore::new();
        assert!(matches!(
            resolve_input(InputType::UserVar, "x", &store),
            Err(RecoveryError::NotImplemented(_))
        ));
    }
}
