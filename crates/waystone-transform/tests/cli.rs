use std::fs;
use std::process::Command;

use pretty_assertions::assert_eq;
use waystone::Manifest;

const BIN: &str = env!("CARGO_BIN_EXE_waystone-transform");

const ORDERS: &str = r#"export async function placeOrder(order) {
    "use workflow";
    const reserve = async () => {
        "use step";
        return order.items.length;
    };
    return await reserve();
}
"#;

#[test]
fn writes_code_and_manifest_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("orders.js");
    let out = dir.path().join("orders.workflow.js");
    let manifest = dir.path().join("manifest.json");
    fs::write(&input, ORDERS)?;

    let status = Command::new(BIN)
        .arg(&input)
        .args(["--mode", "workflow", "--source-path", "./src/orders.js"])
        .arg("--out")
        .arg(&out)
        .arg("--manifest")
        .arg(&manifest)
        .status()?;
    assert!(status.success());

    let code = fs::read_to_string(&out)?;
    assert!(code.contains(
        r#"globalThis[Symbol.for("WORKFLOW_USE_STEP")]("step//./src/orders.js//placeOrder/reserve", () => ({ order }))"#
    ));
    let written: Manifest = serde_json::from_str(&fs::read_to_string(&manifest)?)?;
    assert_eq!(Manifest::extract(&code)?, Some(written.clone()));
    assert_eq!(
        written.workflows["placeOrder"].workflow_id,
        "workflow//./src/orders.js//placeOrder"
    );
    Ok(())
}

#[test]
fn prints_to_stdout_by_default() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("orders.js");
    fs::write(&input, ORDERS)?;

    let output = Command::new(BIN)
        .arg(&input)
        .args(["--source-path", "./orders.js", "--runtime-module", "@acme/durable"])
        .output()?;
    assert!(output.status.success());
    let code = String::from_utf8(output.stdout)?;
    assert!(code.contains(
        "import { __private_getClosureVars, registerStepFunction } from \"@acme/durable\";"
    ));
    assert!(code.contains("placeOrder.workflowId = \"workflow//./orders.js//placeOrder\";"));
    Ok(())
}

#[test]
fn diagnostics_fail_the_command() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("bad.js");
    fs::write(&input, "function f() {\n    \"use step\";\n}\n")?;

    let output = Command::new(BIN)
        .arg(&input)
        .args(["--source-path", "./bad.js"])
        .output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("step functions must be async (in `f`)"), "{stderr}");
    Ok(())
}

#[test]
fn rejects_unknown_modes() -> anyhow::Result<()> {
    let output = Command::new(BIN)
        .args(["missing.js", "--mode", "server"])
        .output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("unknown mode `server`"));
    Ok(())
}
