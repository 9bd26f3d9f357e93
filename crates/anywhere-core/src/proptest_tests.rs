//! Property-based tests for anywhere-core types.
//!
//! These tests use proptest to verify invariants across many randomly generated inputs.

use proptest::prelude::*;

use crate::{replace_registry, Artifact, RegistryMirror, DEFAULT_CORE_REGISTRY};

/// Strategy for generating registry hosts, with or without a port.
fn host_strategy() -> impl Strategy<Value = String> {
    (
        "[a-z][a-z0-9-]{2,12}\\.(local|demo|io|aws)",
        prop::option::of(1024u16..65535),
    )
        .prop_map(|(host, port)| match port {
            Some(p) => format!("{host}:{p}"),
            None => host,
        })
}

/// Strategy for generating repository paths.
fn repository_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9-]{1,15}", 1..4).prop_map(|parts| parts.join("/"))
}

/// Strategy for generating tags.
fn tag_strategy() -> impl Strategy<Value = String> {
    "v?[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}(-eks-a-[0-9]{1,3})?"
}

/// Strategy for generating sha256 digests.
fn digest_strategy() -> impl Strategy<Value = String> {
    "[a-f0-9]{64}".prop_map(|hex| format!("sha256:{hex}"))
}

/// Strategy for generating reference strings in the shapes the mirror accepts.
fn reference_strategy() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just(""), Just("oci://"), Just("https://")],
        host_strategy(),
        repository_strategy(),
        tag_strategy(),
    )
        .prop_map(|(scheme, host, repo, tag)| format!("{scheme}{host}/{repo}:{tag}"))
}

proptest! {
    /// Test that a missing mirror never changes a reference.
    #[test]
    fn nil_mirror_is_identity(reference in reference_strategy()) {
        prop_assert_eq!(replace_registry(None, &reference), reference);
    }

    /// Test that rewriting keeps everything after the host.
    #[test]
    fn rewrite_preserves_path_and_version(
        repo in repository_strategy(),
        tag in tag_strategy(),
        mirror_host in host_strategy(),
        namespace in "[a-z]{3,10}",
    ) {
        let target = format!("{mirror_host}/{namespace}");
        let mirror = RegistryMirror::new(mirror_host).with_namespace(DEFAULT_CORE_REGISTRY, target.clone());

        let original = format!("{DEFAULT_CORE_REGISTRY}/{repo}:{tag}");
        let rewritten = mirror.replace_registry(&original);

        prop_assert_eq!(rewritten, format!("{target}/{repo}:{tag}"));
    }

    /// Test that a host absent from the table is left alone.
    #[test]
    fn unmatched_host_is_unchanged(reference in reference_strategy(), mirror_host in host_strategy()) {
        let mirror = RegistryMirror::new(mirror_host);
        prop_assert_eq!(mirror.replace_registry(&reference), reference);
    }

    /// Test that redirect always lands on the mirror.
    #[test]
    fn redirect_lands_on_mirror(
        host in host_strategy(),
        repo in repository_strategy(),
        tag in tag_strategy(),
        mirror_host in host_strategy(),
    ) {
        let mirror = RegistryMirror::new(mirror_host.clone());
        let redirected = mirror.redirect(&format!("{host}/{repo}:{tag}"));
        prop_assert_eq!(redirected, format!("{mirror_host}/{repo}:{tag}"));
    }

    /// Test that the digest wins the version suffix.
    #[test]
    fn version_prefers_digest(tag in tag_strategy(), digest in digest_strategy()) {
        let both = Artifact::new("r", "p", tag.clone(), digest.clone());
        prop_assert_eq!(both.version(), format!("@{digest}"));

        let tag_only = Artifact::new("r", "p", tag.clone(), "");
        prop_assert_eq!(tag_only.version(), format!(":{tag}"));
    }

    /// Test that parsing a canonical reference reproduces it.
    #[test]
    fn parse_versioned_image_is_stable(
        host in host_strategy(),
        repo in repository_strategy(),
        tag in tag_strategy(),
        digest in prop::option::of(digest_strategy()),
    ) {
        let artifact = Artifact::new(host.clone(), repo.clone(), tag, digest.unwrap_or_default());
        let parsed = Artifact::parse(&artifact.versioned_image());

        prop_assert_eq!(parsed.registry(), host.as_str());
        prop_assert_eq!(parsed.repository(), repo.as_str());
        prop_assert_eq!(parsed.versioned_image(), artifact.versioned_image());
    }
}
