//! NF-e line item entity
//!
//! Table: nfe_itens

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nfe_itens")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub nfe_id: i32,
    /// 1-based position within the document
    pub numero_item: i32,
    pub produto_id: Option<i32>,
    #[sea_orm(column_type = "Text")]
    pub codigo: String,
    #[sea_orm(column_type = "Text")]
    pub descricao: String,
    #[sea_orm(column_type = "Text")]
    pub ncm: String,
    #[sea_orm(column_type = "Text")]
    pub cfop: String,
    #[sea_orm(column_type = "Text")]
    pub unidade: String,
    #[sea_orm(column_type = "Double")]
    pub quantidade: f64,
    #[sea_orm(column_type = "Double")]
    pub valor_unitario: f64,
    #[sea_orm(column_type = "Double")]
    pub valor_desconto: f64,
    /// quantidade * valor_unitario - valor_desconto
    #[sea_orm(column_type = "Double")]
    pub valor_total: f64,
    #[sea_orm(column_type = "Text", nullable)]
    #[serde(rename = "cstICMS")]
    pub cst_icms: Option<String>,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "aliquotaICMS")]
    pub aliquota_icms: f64,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "valorICMS")]
    pub valor_icms: f64,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "aliquotaIPI")]
    pub aliquota_ipi: f64,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "valorIPI")]
    pub valor_ipi: f64,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "aliquotaPIS")]
    pub aliquota_pis: f64,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "valorPIS")]
    pub valor_pis: f64,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "aliquotaCOFINS")]
    pub aliquota_cofins: f64,
    #[sea_orm(column_type = "Double")]
    #[serde(rename = "valorCOFINS")]
    pub valor_cofins: f64,
    #[sea_orm(column_type = "Text", nullable)]
    pub informacoes_adicionais: Option<String>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::nfe::Entity",
        from = "Column::NfeId",
        to = "super::nfe::Column::Id",
        on_delete = "Cascade"
    )]
    Nfe,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProdutoId",
        to = "super::product::Column::Id",
        on_delete = "SetNull"
    )]
    Produto,
}

impl Related<super::nfe::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Nfe.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
