//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Shared primitives and utilities for the agent runtime."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Deployment images are built from tarballs without a .git directory;
    // fall back to build/cargo metadata only in that case.
    if EmitBuilder::builder()
        .all_build()
        .all_cargo()
        .all_git()
        .emit()
        .is_err()
    {
        EmitBuilder::builder().all_build().all_cargo().emit()?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
