// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use hyper::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{admin_mutation, de, invalid_action};
use crate::{
    db::models::NewSponsor,
    error::{ApiError, ApiResult, StoreResultExt},
    rest::{Context, Request},
};

#[derive(Deserialize, Default)]
#[serde(default)]
struct SponsorPayload {
    name: String,
    logo_url: String,
    website_url: Option<String>,
    #[serde(deserialize_with = "de::optional_i32")]
    display_order: Option<i32>,
}

impl SponsorPayload {
    fn into_new_sponsor(self) -> ApiResult<NewSponsor> {
        let name = self.name.trim().to_string();
        let logo_url = self.logo_url.trim().to_string();
        if name.is_empty() || logo_url.is_empty() {
            return Err(ApiError::validation("Name and logo URL are required"));
        }
        Ok(NewSponsor {
            name,
            logo_url,
            website_url: self
                .website_url
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            display_order: self.display_order.unwrap_or(0),
        })
    }
}

pub async fn handle(ctx: &Context, req: &Request) -> ApiResult<Value> {
    match (req.method(), req.action()) {
        (&Method::GET, "list") => {
            let sponsors = ctx
                .store()
                .list_sponsors()
                .await
                .or_internal("Failed to fetch sponsors")?;
            Ok(json!({ "sponsors": sponsors }))
        }
        (&Method::POST, "add") => {
            admin_mutation(ctx, req).await?;
            let sponsor = req.json::<SponsorPayload>()?.into_new_sponsor()?;
            let sponsor = ctx
                .store()
                .create_sponsor(sponsor)
                .await
                .or_internal("Failed to create sponsor")?;
            Ok(json!({ "success": true, "id": sponsor.id }))
        }
        (&Method::PUT, "update") => {
            admin_mutation(ctx, req).await?;
            let id = req.id_param("id", "Sponsor")?;
            let sponsor = req.json::<SponsorPayload>()?.into_new_sponsor()?;
            if !ctx
                .store()
                .update_sponsor(id, sponsor)
                .await
                .or_internal("Failed to update sponsor")?
            {
                return Err(ApiError::not_found("Sponsor not found"));
            }
            Ok(json!({ "success": true }))
        }
        (&Method::DELETE, "delete") => {
            admin_mutation(ctx, req).await?;
            let id = req.id_param("id", "Sponsor")?;
            if !ctx
                .store()
                .delete_sponsor(id)
                .await
                .or_internal("Failed to delete sponsor")?
            {
                return Err(ApiError::not_found("Sponsor not found"));
            }
            Ok(json!({ "success": true }))
        }
        _ => Err(invalid_action()),
    }
}
