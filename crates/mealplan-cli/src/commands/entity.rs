//! Pantry and meal idea command handlers

use anyhow::Result;

use mealplan_core::{Client, EntityId};

use super::note::report;
use crate::output::Output;

pub fn list_pantry(client: &Client, output: &Output) -> Result<()> {
    output.print_pantry_items(&client.state().pantry_items());
    Ok(())
}

pub async fn add_pantry(client: &Client, name: String, quantity: i64, output: &Output) -> Result<()> {
    let (id, outcome) = client.mutations().add_pantry_item(&name, quantity).await?;
    if output.is_quiet() {
        println!("{}", id);
    }
    report(output, outcome, &format!("Added {} x{} ({})", name.trim(), quantity, id));
    Ok(())
}

pub async fn update_pantry(
    client: &Client,
    id: EntityId,
    name: Option<String>,
    quantity: Option<i64>,
    output: &Output,
) -> Result<()> {
    let resolved = id
        .as_local()
        .map(|local| client.store().resolve_temp_id(local))
        .transpose()?
        .flatten();
    let id = resolved.map(EntityId::remote).unwrap_or(id);
    let current = client
        .state()
        .pantry_items()
        .into_iter()
        .find(|item| item.id == id);
    let (name, quantity) = match current {
        Some(item) => (
            name.unwrap_or(item.name),
            quantity.unwrap_or(item.quantity),
        ),
        None => (name.unwrap_or_default(), quantity.unwrap_or(1)),
    };

    let outcome = client
        .mutations()
        .update_pantry_item(&id, &name, quantity)
        .await?;
    report(output, outcome, &format!("Updated {} x{}", name.trim(), quantity));
    Ok(())
}

pub async fn remove_pantry(client: &Client, id: EntityId, output: &Output) -> Result<()> {
    let outcome = client.mutations().delete_pantry_item(&id).await?;
    report(output, outcome, &format!("Removed {}", id));
    Ok(())
}

pub fn list_ideas(client: &Client, output: &Output) -> Result<()> {
    output.print_meal_ideas(&client.state().meal_ideas());
    Ok(())
}

pub async fn add_idea(client: &Client, title: String, output: &Output) -> Result<()> {
    let (id, outcome) = client.mutations().add_meal_idea(&title).await?;
    if output.is_quiet() {
        println!("{}", id);
    }
    report(output, outcome, &format!("Added '{}' ({})", title.trim(), id));
    Ok(())
}

pub async fn update_idea(client: &Client, id: EntityId, title: String, output: &Output) -> Result<()> {
    let outcome = client.mutations().update_meal_idea(&id, &title).await?;
    report(output, outcome, &format!("Renamed {} to '{}'", id, title.trim()));
    Ok(())
}

pub async fn remove_idea(client: &Client, id: EntityId, output: &Output) -> Result<()> {
    let outcome = client.mutations().delete_meal_idea(&id).await?;
    report(output, outcome, &format!("Removed {}", id));
    Ok(())
}
