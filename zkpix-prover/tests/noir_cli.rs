//! NoirCliBackend driven by stand-in `nargo` and `bb` shell scripts.
#![cfg(unix)]

use std::{fs, os::unix::fs::PermissionsExt, path::Path};

use zkpix_common::{
    build_commitment, keccak256, CommitmentFields, EncodedIntent, FlowDirection, LocalSigner,
    SignatureScheme,
};
use zkpix_prover::{
    manifest::write_manifest, ArtifactFile, CircuitManifest, NoirCliBackend, NoirCliConfig,
    ProverError, ProverGateway, WitnessInput,
};

fn witness() -> WitnessInput {
    let signer = LocalSigner::from_hex(
        "0x0000000000000000000000000000000000000000000000000000000000000002",
        SignatureScheme::PrefixedMessage,
    )
    .unwrap();
    let intent = EncodedIntent {
        nonce: 0,
        recipient_key_hash: keccak256(b"0xrecipient"),
        amount: 2550,
    };
    let commitment = build_commitment(
        FlowDirection::Outbound,
        &CommitmentFields {
            recipient_key: "0xrecipient",
            rail_transaction_id: "E777",
            amount: 2550,
            sender_key: Some("bob@bank"),
        },
    )
    .unwrap();
    let signature = signer.sign_hash(&intent.hash()).unwrap();
    WitnessInput::from_attestation(
        FlowDirection::Outbound,
        &commitment,
        &intent,
        &signature,
        &signer.public_key(),
    )
    .unwrap()
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

struct Fixture {
    _root: tempfile::TempDir,
    config: NoirCliConfig,
    circuit_dir: std::path::PathBuf,
}

fn fixture(w: &WitnessInput) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let base = root.path();
    let inbound = base.join("inbound");
    let outbound = base.join("outbound");
    for dir in [&inbound, &outbound] {
        fs::create_dir_all(dir.join("target")).unwrap();
    }
    fs::write(outbound.join("target/zkpix_outbound.json"), b"{\"bytecode\":\"outbound\"}").unwrap();
    fs::write(inbound.join("target/zkpix_inbound.json"), b"{\"bytecode\":\"inbound\"}").unwrap();

    let proof_src = base.join("proof.bin");
    let inputs_src = base.join("public_inputs.bin");
    fs::write(&proof_src, [0xab; 40]).unwrap();
    fs::write(&inputs_src, w.public_inputs().concat()).unwrap();

    let nargo = base.join("nargo");
    write_script(
        &nargo,
        r#"#!/bin/sh
# execute --program-dir DIR --prover-name NAME WITNESS
dir="$3"; name="$5"; witness="$6"
test -f "$dir/$name.toml" || exit 3
grep -q "sender_chave_bytes = \[" "$dir/$name.toml" || exit 4
cp "$dir/$name.toml" "$dir/target/$witness.gz"
"#,
    );
    let bb = base.join("bb");
    write_script(
        &bb,
        &format!(
            r#"#!/bin/sh
case "$1" in
  prove) test -f "$5" || exit 5; cp "{proof}" "$7/proof"; cp "{inputs}" "$7/public_inputs" ;;
  write_vk) echo vk > "$5/vk" ;;
  verify) test -f "$3" || exit 6 ;;
  *) exit 2 ;;
esac
"#,
            proof = proof_src.display(),
            inputs = inputs_src.display()
        ),
    );

    let config = NoirCliConfig::new(&inbound, &outbound).with_binaries(&nargo, &bb);
    Fixture {
        _root: root,
        config,
        circuit_dir: outbound,
    }
}

fn leftover_scratch(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    for dir in [dir.to_path_buf(), dir.join("target")] {
        for entry in fs::read_dir(dir).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            if name.starts_with("Prover_") || name.starts_with("witness_") {
                names.push(name);
            }
        }
    }
    names
}

// One test function: writing and then exec-ing scripts from parallel test
// threads can fail with ETXTBSY.
#[tokio::test]
async fn cli_backend_end_to_end() {
    let w = witness();
    proves_verifies_and_cleans_up(&w).await;
    manifest_mismatch_blocks_proving(&w).await;
}

async fn proves_verifies_and_cleans_up(w: &WitnessInput) {
    let fx = fixture(w);
    let gateway = ProverGateway::new(std::sync::Arc::new(NoirCliBackend::new(fx.config.clone())));

    let bundle = gateway.prove(w).await.unwrap();

    assert_eq!(bundle.proof, vec![0xab; 40]);
    assert_eq!(bundle.public_inputs.len(), 128);
    assert!(leftover_scratch(&fx.circuit_dir).is_empty());
    assert!(fx.circuit_dir.join("target/vk").exists());
}

async fn manifest_mismatch_blocks_proving(w: &WitnessInput) {
    let fx = fixture(w);
    let manifest_path = fx.circuit_dir.join("circuits.json");
    write_manifest(
        &manifest_path,
        &CircuitManifest::new(
            ArtifactFile::from_bytes("inbound/target/zkpix_inbound.json", b"{\"bytecode\":\"inbound\"}"),
            ArtifactFile::from_bytes("outbound/target/zkpix_outbound.json", b"{\"bytecode\":\"stale!!!\"}"),
        ),
    )
    .unwrap();
    let config = fx.config.clone().with_manifest_file(&manifest_path).unwrap();
    let gateway = ProverGateway::new(std::sync::Arc::new(NoirCliBackend::new(config)));

    let err = gateway.prove(w).await.unwrap_err();
    assert!(matches!(err, ProverError::Manifest(_)), "unexpected: {err}");
}
