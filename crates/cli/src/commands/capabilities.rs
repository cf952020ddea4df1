//! `mentor capabilities`: List capabilities or resolve a name.

use mentor_capabilities::{ActivityStore, default_registry};
use mentor_core::NameValidation;

pub fn run(validate: Option<&str>) -> anyhow::Result<()> {
    let registry = default_registry(ActivityStore::new());

    if let Some(name) = validate {
        match registry.validate(name) {
            NameValidation::Exact(canonical) => println!("  ✅ {canonical}"),
            NameValidation::Alias {
                original,
                canonical,
            } => println!("  ↪  \"{original}\" is an alias of {canonical}"),
            NameValidation::Fuzzy {
                original,
                suggestion,
                score,
            } => println!("  ❓ \"{original}\" not found; closest is {suggestion} ({score:.2})"),
            NameValidation::Invalid { reason, .. } => {
                anyhow::bail!("{reason}");
            }
        }
        return Ok(());
    }

    println!("🧰 Capabilities");
    println!("===============");
    for descriptor in registry.descriptors() {
        println!();
        println!("  {} [{}]", descriptor.name, descriptor.category);
        println!("    {}", descriptor.display_name);
        println!("    {}", descriptor.description);
    }
    println!();

    Ok(())
}
