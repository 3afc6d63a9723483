// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use hyper::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{admin_mutation, invalid_action};
use crate::{
    db::models::NewCategory,
    error::{ApiError, ApiResult, StoreResultExt},
    rest::{Context, Request},
    security::sanitize::{sanitize_input, strip_tags},
};

#[derive(Deserialize, Default)]
#[serde(default)]
struct CategoryPayload {
    name: String,
    description: Option<String>,
}

impl CategoryPayload {
    fn into_new_category(self) -> ApiResult<NewCategory> {
        let name = strip_tags(&self.name);
        if name.is_empty() {
            return Err(ApiError::validation("Category name is required"));
        }
        Ok(NewCategory {
            name,
            description: self
                .description
                .map(|d| sanitize_input(&d))
                .filter(|d| !d.is_empty()),
        })
    }
}

pub async fn handle(ctx: &Context, req: &Request) -> ApiResult<Value> {
    match (req.method(), req.action()) {
        (&Method::GET, "list") => list(ctx).await,
        (&Method::POST, "add") => add(ctx, req).await,
        (&Method::PUT, "update") => update(ctx, req).await,
        (&Method::DELETE, "delete") => delete(ctx, req).await,
        _ => Err(invalid_action()),
    }
}

async fn list(ctx: &Context) -> ApiResult<Value> {
    let categories = ctx
        .store()
        .list_categories()
        .await
        .or_internal("Failed to fetch categories")?;
    Ok(json!({ "categories": categories }))
}

async fn add(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let category = req.json::<CategoryPayload>()?.into_new_category()?;
    let category = ctx
        .store()
        .create_category(category)
        .await
        .or_internal("Failed to create category")?;
    Ok(json!({ "success": true, "id": category.id }))
}

async fn update(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let id = req.id_param("id", "Category")?;
    let category = req.json::<CategoryPayload>()?.into_new_category()?;
    let existing = ctx
        .store()
        .find_category(id)
        .await
        .or_internal("Failed to update category")?
        .ok_or_else(|| ApiError::not_found("Category not found"))?;

    // Challenges refer to categories by name.
    if existing.name != category.name
        && ctx
            .store()
            .count_challenges_in_category(&existing.name)
            .await
            .or_internal("Failed to update category")?
            > 0
    {
        return Err(ApiError::conflict(
            "Cannot rename category: it is used by challenges",
        ));
    }
    if !ctx
        .store()
        .update_category(id, category)
        .await
        .or_internal("Failed to update category")?
    {
        return Err(ApiError::not_found("Category not found"));
    }
    Ok(json!({ "success": true }))
}

async fn delete(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let id = req.id_param("id", "Category")?;
    let category = ctx
        .store()
        .find_category(id)
        .await
        .or_internal("Failed to delete category")?
        .ok_or_else(|| ApiError::not_found("Category not found"))?;
    let in_use = ctx
        .store()
        .count_challenges_in_category(&category.name)
        .await
        .or_internal("Failed to delete category")?;
    if in_use > 0 {
        return Err(ApiError::conflict(
            "Cannot delete category: it is used by challenges",
        ));
    }
    ctx.store()
        .delete_category(id)
        .await
        .or_internal("Failed to delete category")?;
    tracing::info!(category = %category.name, "Deleted category");
    Ok(json!({ "success": true }))
}
