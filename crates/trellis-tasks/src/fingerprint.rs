//! Target fingerprints
//!
//! A target's fingerprint covers its own declaration, the fingerprints of
//! everything in its `expanded_deps`, and the generator's configuration
//! digest. Fingerprints are computed in build order so a change anywhere
//! below a target reaches it.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use trellis_core::target::Visibility;
use trellis_core::{Graph, GraphError, Target};

/// Hex digest of a byte string
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hex digest of a file's contents
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fingerprint one target given its dependencies' fingerprints, in
/// `expanded_deps` order
pub fn target_fingerprint<'a, I>(target: &Target, dep_fingerprints: I, config_digest: &str) -> String
where
    I: IntoIterator<Item = (String, &'a str)>,
{
    let mut hasher = Sha256::new();
    let mut field = |tag: &str, value: &str| {
        hasher.update(tag.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\0");
    };

    field("key", &target.key().to_string());
    field("type", target.kind.as_str());
    for src in &target.srcs {
        field("src", src);
    }
    for dep in &target.deps {
        field("dep", &dep.to_string());
    }
    match &target.visibility {
        Visibility::Public => field("visibility", "public"),
        Visibility::Only(allowed) => {
            for key in allowed {
                field("visibility", &key.to_string());
            }
        }
    }
    for (name, value) in &target.attr {
        field(&format!("attr.{}", name), &value.canonical());
    }
    if let Some(spec) = &target.test {
        // serde_json output is stable here: TestSpec has no hash maps
        let encoded = serde_json::to_string(spec).unwrap_or_default();
        field("test", &encoded);
    }
    for (key, fingerprint) in dep_fingerprints {
        field(&format!("expanded.{}", key), fingerprint);
    }
    field("config", config_digest);

    format!("{:x}", hasher.finalize())
}

/// Fill `Target::fingerprint` for every target of an analyzed graph
#[instrument(skip_all, fields(targets = graph.len()))]
pub fn compute_fingerprints(graph: &mut Graph, config_digest: &str) -> Result<(), GraphError> {
    let order = graph.sorted()?.to_vec();

    for key in &order {
        let fingerprint = {
            let Some(target) = graph.get(key) else {
                continue;
            };
            let deps: Vec<(String, String)> = target
                .expanded_deps
                .iter()
                .map(|dep| {
                    let fp = graph
                        .get(dep)
                        .and_then(|t| t.fingerprint.clone())
                        .unwrap_or_default();
                    (dep.to_string(), fp)
                })
                .collect();
            target_fingerprint(
                target,
                deps.iter().map(|(k, fp)| (k.clone(), fp.as_str())),
                config_digest,
            )
        };
        if let Some(target) = graph.get_mut(key) {
            target.fingerprint = Some(fingerprint);
        }
    }

    debug!(targets = order.len(), "fingerprints computed");
    Ok(())
}
