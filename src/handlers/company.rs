//! Company profile handlers

use axum::{Extension, Json};
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};

use crate::entity::company;
use crate::entity::system_audit_log::AuditAction;
use crate::error::AppResult;
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;

use super::require_text;

/// Company profile body; every field is replaced on save
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRequest {
    pub name: String,
    pub logo: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

/// GET /api/company
///
/// Returns the profile or `{}` when none was saved yet.
pub async fn get_company(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<serde_json::Value>> {
    let profile = company::Entity::find()
        .order_by_asc(company::Column::Id)
        .one(&*db)
        .await?;
    Ok(Json(match profile {
        Some(model) => serde_json::to_value(model)?,
        None => serde_json::json!({}),
    }))
}

/// PUT /api/company
pub async fn save_company(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CompanyRequest>,
) -> AppResult<Json<company::Model>> {
    current_user.require(perm::ADMIN)?;
    require_text("name", &req.name, "Nome da empresa é obrigatório")?;

    let existing = company::Entity::find()
        .order_by_asc(company::Column::Id)
        .one(&*db)
        .await?;

    let (saved, action) = match existing {
        Some(row) => {
            let mut model: company::ActiveModel = row.into();
            fill(&mut model, req);
            (model.update(&*db).await?, AuditAction::Update)
        }
        None => {
            let mut model = company::ActiveModel {
                created_at: Set(crate::db::now()),
                ..Default::default()
            };
            fill(&mut model, req);
            (model.insert(&*db).await?, AuditAction::Create)
        }
    };

    record(&current_user, action, "admin", "companies", saved.id, None);
    Ok(Json(saved))
}

fn fill(model: &mut company::ActiveModel, req: CompanyRequest) {
    model.name = Set(req.name);
    model.logo = Set(req.logo);
    model.tax_id = Set(req.tax_id);
    model.address = Set(req.address);
    model.phone = Set(req.phone);
    model.email = Set(req.email);
    model.website = Set(req.website);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Permissions;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn admin() -> CurrentUser {
        CurrentUser {
            id: 1,
            username: "administrador".into(),
            full_name: "Administrador".into(),
            role: "admin".into(),
            permissions: Permissions::all(),
            ip: None,
            user_agent: None,
        }
    }

    fn row(req: &CompanyRequest) -> company::Model {
        company::Model {
            id: 1,
            name: req.name.clone(),
            logo: req.logo.clone(),
            tax_id: req.tax_id.clone(),
            address: req.address.clone(),
            phone: req.phone.clone(),
            email: req.email.clone(),
            website: req.website.clone(),
            created_at: crate::db::now(),
        }
    }

    #[tokio::test]
    async fn test_saved_profile_is_returned_unchanged() {
        let req = CompanyRequest {
            name: "Indústria Exemplo Ltda".into(),
            logo: None,
            tax_id: Some("12.345.678/0001-90".into()),
            address: Some("Rua A, 10".into()),
            phone: None,
            email: Some("contato@exemplo.com".into()),
            website: None,
        };
        let saved = row(&req);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<company::Model>::new()])
            .append_query_results([vec![saved.clone()]])
            .append_query_results([vec![saved.clone()]])
            .into_connection();
        let db = DbConn(db);

        let Json(created) = save_company(Extension(db.clone()), Extension(admin()), Json(req.clone()))
            .await
            .unwrap();
        assert_eq!(created.tax_id, req.tax_id);

        let Json(fetched) = get_company(Extension(db)).await.unwrap();
        assert_eq!(fetched["name"], "Indústria Exemplo Ltda");
        assert_eq!(fetched["taxId"], "12.345.678/0001-90");
        assert_eq!(fetched["email"], "contato@exemplo.com");
    }

    #[tokio::test]
    async fn test_empty_profile_is_empty_object() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<company::Model>::new()])
            .into_connection();
        let Json(body) = get_company(Extension(DbConn(db))).await.unwrap();
        assert_eq!(body, serde_json::json!({}));
    }
}
