//! NF-e event log entity
//!
//! Table: nfe_eventos

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const TIPO_CRIACAO: &str = "criacao";
pub const TIPO_ATUALIZACAO: &str = "atualizacao";
pub const TIPO_ALTERACAO_STATUS: &str = "alteracao_status";
pub const TIPO_CANCELAMENTO: &str = "cancelamento";

pub const STATUS_SUCESSO: &str = "sucesso";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nfe_eventos")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub nfe_id: i32,
    #[sea_orm(column_type = "Text")]
    pub tipo: String,
    #[sea_orm(column_type = "Text")]
    pub status: String,
    #[sea_orm(column_type = "Text")]
    pub mensagem: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub xml: Option<String>,
    pub data_evento: DateTime,
    pub created_by: Option<i32>,
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
}

impl Related<super::nfe::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Nfe.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
