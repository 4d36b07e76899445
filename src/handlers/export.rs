//! CSV export endpoint
//!
//! `GET /api/export/:file` where `file` is `<resource>.csv`. Each resource is
//! gated by the flag of the module that owns it.

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder};
use serde::Serialize;
use serde_json::Value;

use crate::entity::{
    account, customer, employee, equipment, expense, inventory_movement, maintenance_order, nfe,
    order, product, production_order, quality_inspection, raw_material, supplier,
};
use crate::error::{AppError, AppResult};
use crate::export::{export_csv, Column};
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;

/// An exportable table
pub struct ExportResource {
    pub name: &'static str,
    pub flag: &'static str,
    pub columns: &'static [Column],
}

pub static RESOURCES: [ExportResource; 14] = [
    ExportResource {
        name: "raw-materials",
        flag: perm::INVENTORY,
        columns: &[
            Column::new("code", "Código"),
            Column::new("name", "Nome"),
            Column::new("unit", "Unidade"),
            Column::new("currentStock", "Estoque atual"),
            Column::new("minimumStock", "Estoque mínimo"),
            Column::new("price", "Preço"),
            Column::new("locationInWarehouse", "Localização"),
        ],
    },
    ExportResource {
        name: "inventory-movements",
        flag: perm::INVENTORY,
        columns: &[
            Column::new("id", "ID"),
            Column::new("materialId", "Matéria-prima"),
            Column::new("transactionType", "Tipo"),
            Column::new("quantity", "Quantidade"),
            Column::new("lotNumber", "Lote"),
            Column::new("notes", "Observações"),
            Column::new("createdAt", "Data"),
        ],
    },
    ExportResource {
        name: "products",
        flag: perm::PRODUCTION,
        columns: &[
            Column::new("code", "Código"),
            Column::new("name", "Nome"),
            Column::new("unitCost", "Custo unitário"),
            Column::new("sellingPrice", "Preço de venda"),
            Column::new("formula", "Fórmula"),
        ],
    },
    ExportResource {
        name: "production-orders",
        flag: perm::PRODUCTION,
        columns: &[
            Column::new("orderNumber", "Número"),
            Column::new("productId", "Produto"),
            Column::new("quantity", "Quantidade"),
            Column::new("status", "Status"),
            Column::new("startDate", "Início"),
            Column::new("endDate", "Fim"),
        ],
    },
    ExportResource {
        name: "equipment",
        flag: perm::MAINTENANCE,
        columns: &[
            Column::new("name", "Nome"),
            Column::new("model", "Modelo"),
            Column::new("serialNumber", "Número de série"),
            Column::new("sector", "Setor"),
            Column::new("criticality", "Criticidade"),
            Column::new("status", "Status"),
        ],
    },
    ExportResource {
        name: "maintenance-orders",
        flag: perm::MAINTENANCE,
        columns: &[
            Column::new("orderNumber", "Número"),
            Column::new("equipmentId", "Equipamento"),
            Column::new("type", "Tipo"),
            Column::new("urgency", "Urgência"),
            Column::new("status", "Status"),
            Column::new("scheduledDate", "Agendada"),
            Column::new("completionDate", "Concluída"),
        ],
    },
    ExportResource {
        name: "accounts",
        flag: perm::FINANCE,
        columns: &[
            Column::new("description", "Descrição"),
            Column::new("type", "Tipo"),
            Column::new("amount", "Valor"),
            Column::new("dueDate", "Vencimento"),
            Column::new("status", "Status"),
            Column::new("entityName", "Entidade"),
            Column::new("documentNumber", "Documento"),
        ],
    },
    ExportResource {
        name: "expenses",
        flag: perm::FINANCE,
        columns: &[
            Column::new("description", "Descrição"),
            Column::new("category", "Categoria"),
            Column::new("amount", "Valor"),
            Column::new("dueDate", "Vencimento"),
            Column::new("paymentDate", "Pagamento"),
            Column::new("costCenter", "Centro de custo"),
        ],
    },
    ExportResource {
        name: "customers",
        flag: perm::COMMERCIAL,
        columns: &[
            Column::new("name", "Nome"),
            Column::new("taxId", "CNPJ/CPF"),
            Column::new("contactName", "Contato"),
            Column::new("email", "E-mail"),
            Column::new("phone", "Telefone"),
        ],
    },
    ExportResource {
        name: "orders",
        flag: perm::COMMERCIAL,
        columns: &[
            Column::new("orderNumber", "Número"),
            Column::new("customerId", "Cliente"),
            Column::new("orderDate", "Data"),
            Column::new("deliveryDate", "Entrega"),
            Column::new("status", "Status"),
            Column::new("totalAmount", "Total"),
        ],
    },
    ExportResource {
        name: "suppliers",
        flag: perm::PURCHASE,
        columns: &[
            Column::new("name", "Nome"),
            Column::new("taxId", "CNPJ"),
            Column::new("contactName", "Contato"),
            Column::new("email", "E-mail"),
            Column::new("phone", "Telefone"),
        ],
    },
    ExportResource {
        name: "employees",
        flag: perm::HR,
        columns: &[
            Column::new("name", "Nome"),
            Column::new("cpf", "CPF"),
            Column::new("position", "Cargo"),
            Column::new("department", "Departamento"),
            Column::new("hiringDate", "Admissão"),
            Column::new("status", "Status"),
        ],
    },
    ExportResource {
        name: "quality-inspections",
        flag: perm::QUALITY,
        columns: &[
            Column::new("inspectionType", "Tipo"),
            Column::new("referenceType", "Referência"),
            Column::new("referenceId", "ID referência"),
            Column::new("result", "Resultado"),
            Column::new("inspectionDate", "Data"),
            Column::new("notes", "Observações"),
        ],
    },
    ExportResource {
        name: "nfes",
        flag: perm::FISCAL,
        columns: &[
            Column::new("numero", "Número"),
            Column::new("serie", "Série"),
            Column::new("chave", "Chave de acesso"),
            Column::new("dataEmissao", "Emissão"),
            Column::new("status", "Status"),
            Column::new("valorTotal", "Valor total"),
        ],
    },
];

/// Look up a resource by its file name, e.g. `accounts.csv`
pub fn find_resource(file: &str) -> Option<&'static ExportResource> {
    let name = file.strip_suffix(".csv")?;
    RESOURCES.iter().find(|r| r.name == name)
}

async fn json_rows<E>(db: &DatabaseConnection, order: E::Column) -> AppResult<Vec<Value>>
where
    E: EntityTrait,
    E::Model: Serialize,
{
    let rows = E::find().order_by_asc(order).all(db).await?;
    rows.iter()
        .map(|row| serde_json::to_value(row).map_err(AppError::from))
        .collect()
}

async fn load(db: &DatabaseConnection, name: &str) -> AppResult<Vec<Value>> {
    match name {
        "raw-materials" => json_rows::<raw_material::Entity>(db, raw_material::Column::Name).await,
        "inventory-movements" => {
            json_rows::<inventory_movement::Entity>(db, inventory_movement::Column::Id).await
        }
        "products" => json_rows::<product::Entity>(db, product::Column::Name).await,
        "production-orders" => {
            json_rows::<production_order::Entity>(db, production_order::Column::Id).await
        }
        "equipment" => json_rows::<equipment::Entity>(db, equipment::Column::Name).await,
        "maintenance-orders" => {
            json_rows::<maintenance_order::Entity>(db, maintenance_order::Column::Id).await
        }
        "accounts" => {
            let today = crate::db::today();
            let rows = account::Entity::find()
                .order_by_asc(account::Column::DueDate)
                .all(db)
                .await?;
            rows.into_iter()
                .map(|a| serde_json::to_value(a.with_effective_status(today)).map_err(AppError::from))
                .collect()
        }
        "expenses" => json_rows::<expense::Entity>(db, expense::Column::DueDate).await,
        "customers" => json_rows::<customer::Entity>(db, customer::Column::Name).await,
        "orders" => json_rows::<order::Entity>(db, order::Column::Id).await,
        "suppliers" => json_rows::<supplier::Entity>(db, supplier::Column::Name).await,
        "employees" => json_rows::<employee::Entity>(db, employee::Column::Name).await,
        "quality-inspections" => {
            json_rows::<quality_inspection::Entity>(db, quality_inspection::Column::Id).await
        }
        "nfes" => json_rows::<nfe::Entity>(db, nfe::Column::Numero).await,
        other => Err(AppError::NotFound(format!("Exportação '{}'", other))),
    }
}

/// GET /api/export/:file
pub async fn export_resource(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(file): Path<String>,
) -> AppResult<Response> {
    let resource =
        find_resource(&file).ok_or_else(|| AppError::NotFound(format!("Exportação '{}'", file)))?;
    current_user.require(resource.flag)?;

    let rows = load(&db, resource.name).await?;
    let body = export_csv(resource.columns, &rows)?;
    tracing::info!(
        "{} exported {} rows of {}",
        current_user.username,
        rows.len(),
        resource.name
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.csv\"", resource.name),
            ),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_find_resource() {
        assert_eq!(find_resource("accounts.csv").map(|r| r.flag), Some(perm::FINANCE));
        assert!(find_resource("accounts").is_none());
        assert!(find_resource("users.csv").is_none());
    }

    #[test]
    fn test_resource_names_unique() {
        let names: HashSet<_> = RESOURCES.iter().map(|r| r.name).collect();
        assert_eq!(names.len(), RESOURCES.len());
    }

    #[test]
    fn test_every_resource_is_gated_by_a_module_flag() {
        for r in &RESOURCES {
            assert!(perm::ALL.contains(&r.flag), "{}", r.name);
            assert!(!r.columns.is_empty());
        }
    }

    #[test]
    fn test_account_columns_match_model_json() {
        let model = account::Model {
            id: 1,
            description: "Energia".into(),
            amount: 350.0,
            due_date: crate::db::today(),
            account_type: "payable".into(),
            status: "pending".into(),
            entity_name: "Cemig".into(),
            entity_id: None,
            document_number: None,
            created_at: crate::db::now(),
            created_by: None,
        };
        let row = serde_json::to_value(model).unwrap();
        let columns = find_resource("accounts.csv").unwrap().columns;
        for column in columns {
            assert!(row.get(column.key).is_some(), "missing key {}", column.key);
        }
    }
}
