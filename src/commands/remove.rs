use anyhow::Result;
use owo_colors::OwoColorize;
use webcal_core::store::DirectoryStore;

use crate::render::Render;

pub fn run(store: &DirectoryStore, slug: &str) -> Result<()> {
    let subscription = store.delete_subscription(slug)?;
    println!("{} {}", "Removed:".red(), subscription.render());
    Ok(())
}
