//! NF-e (electronic invoice) entity
//!
//! Table: nfes

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_DRAFT: &str = "em_digitacao";
pub const STATUS_AUTHORIZED: &str = "autorizada";
pub const STATUS_CANCELLED: &str = "cancelada";
pub const STATUS_DENIED: &str = "denegada";

/// Documents in these statuses can no longer be edited or deleted
pub fn is_locked(status: &str) -> bool {
    matches!(status, STATUS_AUTHORIZED | STATUS_CANCELLED | STATUS_DENIED)
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nfes")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub numero: i32,
    pub serie: i32,
    /// 44-digit access key
    #[sea_orm(column_type = "Text", unique)]
    pub chave: String,
    pub data_emissao: DateTime,
    #[sea_orm(column_type = "Text")]
    pub status: String,
    /// 55 = NF-e, 65 = NFC-e
    #[sea_orm(column_type = "Text")]
    pub modelo_documento: String,
    #[sea_orm(column_type = "Text")]
    pub natureza_operacao: String,
    /// 0 = entrada, 1 = saida
    #[sea_orm(column_type = "Text")]
    pub tipo_operacao: String,
    #[sea_orm(column_type = "Text")]
    pub finalidade: String,
    pub destinatario_id: i32,
    #[sea_orm(column_type = "Double")]
    pub valor_total: f64,
    #[sea_orm(column_type = "Double")]
    pub valor_produtos: f64,
    #[sea_orm(column_type = "Double")]
    pub valor_frete: f64,
    #[sea_orm(column_type = "Double")]
    pub valor_seguro: f64,
    #[sea_orm(column_type = "Double")]
    pub valor_desconto: f64,
    #[sea_orm(column_type = "Double")]
    pub valor_outras_despesas: f64,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "valorICMS")]
    pub valor_icms: f64,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "valorIPI")]
    pub valor_ipi: f64,
    #[sea_orm(column_type = "Text", nullable)]
    pub informacoes_adicionais: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub motivo_cancelamento: Option<String>,
    pub data_cancelamento: Option<DateTime>,
    pub pedido_id: Option<i32>,
    pub created_at: DateTime,
    pub created_by: i32,
    pub updated_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::DestinatarioId",
        to = "super::customer::Column::Id"
    )]
    Destinatario,
}

impl ActiveModelBehavior for ActiveModel {}
