//! Identifier and naming rules shared by the gateways, the jobs, and the
//! controller.
//!
//! Every name the system derives from a tenant id goes through [`sanitize`]
//! first, so database, role, and schema names stay valid SQL identifiers no
//! matter what the id contains.

/// Replaces characters that are invalid in SQL identifiers.
///
/// Lowercases the input and maps `-` and `.` to `_`. Idempotent.
pub fn sanitize(s: &str) -> String {
    s.to_lowercase().replace(['-', '.'], "_")
}

/// Role name for a tenant: `user_<sanitized uid>`.
pub fn rdb_username(user_uid: &str) -> String {
    format!("user_{}", sanitize(user_uid))
}

/// Database name for a tenant: `db_<sanitized uid>`.
pub fn rdb_database(user_uid: &str) -> String {
    format!("db_{}", sanitize(user_uid))
}

/// Schema name for a logical resource: `schema_<sanitized id>`.
pub fn rdb_schema(resource_id: &str) -> String {
    format!("schema_{}", sanitize(resource_id))
}

/// Name of the `WorkerApp` custom resource and all of its children.
pub fn worker_name(worker_id: &str, user_uid: &str) -> String {
    format!("{worker_id}-{user_uid}")
}

/// Name of the worker's environment ConfigMap.
pub fn worker_env_config_map_name(worker_id: &str, user_uid: &str) -> String {
    format!("{}-env", worker_name(worker_id, user_uid))
}

/// Name of the worker's opaque Secret.
pub fn worker_secret_name(worker_id: &str, user_uid: &str) -> String {
    format!("{}-secret", worker_name(worker_id, user_uid))
}

/// Public hostname of a worker under the platform domain.
pub fn worker_host(worker_id: &str, user_uid: &str, domain: &str) -> String {
    format!("{}.worker.{domain}", worker_name(worker_id, user_uid))
}

/// Name of the `CombinatorApp` custom resource and its deployment/service.
pub fn combinator_name(user_uid: &str) -> String {
    format!("combinator-{user_uid}")
}

/// Name of the combinator's config ConfigMap.
pub fn combinator_config_map_name(user_uid: &str) -> String {
    format!("combinator-config-{user_uid}")
}

/// Public hostname of a tenant's combinator under the platform domain.
pub fn combinator_host(user_uid: &str, domain: &str) -> String {
    format!("{user_uid}.combinator.{domain}")
}

/// Name of the cluster objects backing a verified custom domain.
pub fn custom_domain_name(cdid: &str) -> String {
    format!("custom-domain-{cdid}")
}

/// Name of the TLS secret issued for a verified custom domain.
pub fn custom_domain_tls_secret_name(cdid: &str) -> String {
    format!("custom-domain-tls-{cdid}")
}

/// TXT record name a tenant must create to prove domain ownership.
pub fn domain_txt_name(domain: &str) -> String {
    format!("_combinator-verify.{domain}")
}

/// TXT record value carrying the verification token.
pub fn domain_txt_value(token: &str) -> String {
    format!("combinator-verify={token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_maps_separators() {
        assert_eq!(sanitize("Abc-DEF.ghi"), "abc_def_ghi");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for input in ["jabber-147.008", "ALREADY_CLEAN", "a.b-c.d"] {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once);
        }
    }

    #[test]
    fn derived_names_use_sanitized_uid() {
        assert_eq!(rdb_username("Jab-ber"), "user_jab_ber");
        assert_eq!(rdb_database("Jab-ber"), "db_jab_ber");
        assert_eq!(rdb_schema("303737E9.3eb57281"), "schema_303737e9_3eb57281");
    }

    #[test]
    fn worker_names_and_host() {
        assert_eq!(worker_name("w1", "uid1"), "w1-uid1");
        assert_eq!(worker_env_config_map_name("w1", "uid1"), "w1-uid1-env");
        assert_eq!(worker_secret_name("w1", "uid1"), "w1-uid1-secret");
        assert_eq!(worker_host("w1", "uid1", "app238.com"), "w1-uid1.worker.app238.com");
    }

    #[test]
    fn combinator_names_and_host() {
        assert_eq!(combinator_name("uid1"), "combinator-uid1");
        assert_eq!(combinator_config_map_name("uid1"), "combinator-config-uid1");
        assert_eq!(combinator_host("uid1", "app238.com"), "uid1.combinator.app238.com");
    }

    #[test]
    fn domain_challenge_names() {
        assert_eq!(domain_txt_name("shop.example.com"), "_combinator-verify.shop.example.com");
        assert_eq!(domain_txt_value("deadbeef"), "combinator-verify=deadbeef");
    }
}
