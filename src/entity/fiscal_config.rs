//! Fiscal configuration entity
//!
//! Table: fiscal_configs

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fiscal_configs")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// homologacao or producao
    #[sea_orm(column_type = "Text")]
    pub ambiente: String,
    #[serde(rename = "serieNFe")]
    pub serie_nfe: i32,
    /// Number assigned to the next NF-e
    #[serde(rename = "proximoNumeroNFe")]
    pub proximo_numero_nfe: i32,
    /// simples, presumido, real
    #[sea_orm(column_type = "Text")]
    pub regime_tributario: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub inscricao_estadual: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub inscricao_municipal: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub cnae: Option<String>,
    /// Issuer state abbreviation, e.g. MG
    #[sea_orm(column_type = "Text")]
    pub uf_emissor: String,
    /// Issuer CNPJ, digits only
    #[sea_orm(column_type = "Text", nullable)]
    pub cnpj_emissor: Option<String>,
    pub created_at: DateTime,
    pub updated_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
