//! Fiscal handlers: issuer configuration and NF-e documents
//!
//! Documents are numbered from the fiscal configuration inside a transaction
//! that locks the configuration row, so two concurrent creations never share
//! a number. Transmission to SEFAZ is not performed; the access key is built
//! locally.
//!
//! Every change to a document (its line items included) runs in a
//! transaction holding the document row lock and appends to the document's
//! event log. Product, ICMS and IPI totals follow the line items whenever the
//! document has any.

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entity::nfe::{self, is_locked, STATUS_AUTHORIZED, STATUS_CANCELLED, STATUS_DENIED, STATUS_DRAFT};
use crate::entity::nfe_evento::{
    self, STATUS_SUCESSO, TIPO_ALTERACAO_STATUS, TIPO_ATUALIZACAO, TIPO_CANCELAMENTO, TIPO_CRIACAO,
};
use crate::entity::system_audit_log::AuditAction;
use crate::entity::{company, customer, fiscal_config, nfe_item};
use crate::error::{AppError, AppResult, OptionExt};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::pagination::{paginate_query, PageParams, PageQuery, Paginated, SortOrder};
use crate::permission::perm;

use super::{find_or_404, require_one_of, require_text, Created};

const MODULE: &str = perm::FISCAL;
const RESOURCE: &str = "NF-e";
const ITEM_RESOURCE: &str = "Item da NF-e";
const CONFIG_RESOURCE: &str = "Configuração fiscal";

const AMBIENTES: [&str; 2] = ["homologacao", "producao"];
const REGIMES: [&str; 3] = ["simples", "presumido", "real"];
const MODELOS: [&str; 2] = ["55", "65"];
/// Statuses reachable through a plain update; cancelling has its own endpoint
const EDITABLE_STATUSES: [&str; 3] = [STATUS_DRAFT, STATUS_AUTHORIZED, STATUS_DENIED];

/// Normal emission
const TP_EMIS_NORMAL: u8 = 1;
const JUSTIFICATION_MIN: usize = 15;
const JUSTIFICATION_MAX: usize = 255;

// ---------------------------------------------------------------------------
// Access key
// ---------------------------------------------------------------------------

/// IBGE code of a state abbreviation
pub fn uf_code(uf: &str) -> Option<u8> {
    let code = match uf.trim().to_ascii_uppercase().as_str() {
        "RO" => 11,
        "AC" => 12,
        "AM" => 13,
        "RR" => 14,
        "PA" => 15,
        "AP" => 16,
        "TO" => 17,
        "MA" => 21,
        "PI" => 22,
        "CE" => 23,
        "RN" => 24,
        "PB" => 25,
        "PE" => 26,
        "AL" => 27,
        "SE" => 28,
        "BA" => 29,
        "MG" => 31,
        "ES" => 32,
        "RJ" => 33,
        "SP" => 35,
        "PR" => 41,
        "SC" => 42,
        "RS" => 43,
        "MS" => 50,
        "MT" => 51,
        "GO" => 52,
        "DF" => 53,
        _ => return None,
    };
    Some(code)
}

/// Modulo 11 check digit with weights 2..9 cycling from the rightmost digit.
/// Non-digit characters are ignored.
pub fn check_digit(digits: &str) -> u8 {
    let sum: u32 = digits
        .chars()
        .rev()
        .filter_map(|c| c.to_digit(10))
        .zip((2..=9).cycle())
        .map(|(d, w)| d * w)
        .sum();
    match sum % 11 {
        0 | 1 => 0,
        r => (11 - r) as u8,
    }
}

/// Eight digit random code of the access key
pub fn random_code() -> u32 {
    (uuid::Uuid::new_v4().as_u128() % 100_000_000) as u32
}

/// Inputs of a 44-digit access key
#[derive(Debug, Clone)]
pub struct AccessKey<'a> {
    pub uf: &'a str,
    pub issued_at: NaiveDateTime,
    pub cnpj: &'a str,
    pub modelo: &'a str,
    pub serie: i32,
    pub numero: i32,
    pub tp_emis: u8,
    pub code: u32,
}

impl AccessKey<'_> {
    /// Build the key `cUF AAMM CNPJ mod serie nNF tpEmis cNF DV`
    pub fn build(&self) -> AppResult<String> {
        let cuf = uf_code(self.uf)
            .ok_or_else(|| AppError::field("ufEmissor", format!("UF inválida '{}'", self.uf)))?;
        let cnpj = digits(self.cnpj);
        if cnpj.len() != 14 {
            return Err(AppError::field("cnpjEmissor", "CNPJ do emissor deve ter 14 dígitos"));
        }
        if !(0..=999).contains(&self.serie) {
            return Err(AppError::field("serie", "Série deve estar entre 0 e 999"));
        }
        if !(1..=999_999_999).contains(&self.numero) {
            return Err(AppError::field("numero", "Número da NF-e fora do intervalo"));
        }
        if self.modelo.len() != 2 || !self.modelo.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::field("modeloDocumento", "Modelo deve ter 2 dígitos"));
        }

        let body = format!(
            "{:02}{:02}{:02}{}{}{:03}{:09}{}{:08}",
            cuf,
            self.issued_at.year() % 100,
            self.issued_at.month(),
            cnpj,
            self.modelo,
            self.serie,
            self.numero,
            self.tp_emis,
            self.code % 100_000_000,
        );
        let dv = check_digit(&body);
        Ok(format!("{}{}", body, dv))
    }
}

/// Whether a 44-digit key carries a valid check digit
pub fn is_valid_key(key: &str) -> bool {
    key.len() == 44
        && key.chars().all(|c| c.is_ascii_digit())
        && key[43..].parse::<u8>().ok() == Some(check_digit(&key[..43]))
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFiscalConfig {
    pub ambiente: Option<String>,
    #[serde(rename = "serieNFe")]
    pub serie_nfe: Option<i32>,
    #[serde(rename = "proximoNumeroNFe")]
    pub proximo_numero_nfe: Option<i32>,
    pub regime_tributario: String,
    pub inscricao_estadual: Option<String>,
    pub inscricao_municipal: Option<String>,
    pub cnae: Option<String>,
    pub uf_emissor: String,
    pub cnpj_emissor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFiscalConfig {
    pub ambiente: Option<String>,
    #[serde(rename = "serieNFe")]
    pub serie_nfe: Option<i32>,
    #[serde(rename = "proximoNumeroNFe")]
    pub proximo_numero_nfe: Option<i32>,
    pub regime_tributario: Option<String>,
    pub inscricao_estadual: Option<String>,
    pub inscricao_municipal: Option<String>,
    pub cnae: Option<String>,
    pub uf_emissor: Option<String>,
    pub cnpj_emissor: Option<String>,
}

fn validate_uf(uf: &str) -> AppResult<()> {
    uf_code(uf)
        .map(|_| ())
        .ok_or_else(|| AppError::field("ufEmissor", format!("UF inválida '{}'", uf)))
}

fn validate_next_number(n: i32) -> AppResult<()> {
    if n < 1 {
        return Err(AppError::field("proximoNumeroNFe", "Número deve ser maior que zero"));
    }
    Ok(())
}

fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// GET /api/fiscal/config
pub async fn get_fiscal_config(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Option<fiscal_config::Model>>> {
    let config = fiscal_config::Entity::find()
        .order_by_asc(fiscal_config::Column::Id)
        .one(&*db)
        .await?;
    Ok(Json(config))
}

/// POST /api/fiscal/config
pub async fn create_fiscal_config(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateFiscalConfig>,
) -> AppResult<Created<fiscal_config::Model>> {
    if fiscal_config::Entity::find().one(&*db).await?.is_some() {
        return Err(AppError::Conflict("Configuração fiscal já cadastrada".to_string()));
    }
    let ambiente = req.ambiente.unwrap_or_else(|| AMBIENTES[0].to_string());
    require_one_of("ambiente", &ambiente, &AMBIENTES)?;
    require_one_of("regimeTributario", &req.regime_tributario, &REGIMES)?;
    validate_uf(&req.uf_emissor)?;
    let next = req.proximo_numero_nfe.unwrap_or(1);
    validate_next_number(next)?;

    let created = fiscal_config::ActiveModel {
        ambiente: Set(ambiente),
        serie_nfe: Set(req.serie_nfe.unwrap_or(1)),
        proximo_numero_nfe: Set(next),
        regime_tributario: Set(req.regime_tributario),
        inscricao_estadual: Set(req.inscricao_estadual),
        inscricao_municipal: Set(req.inscricao_municipal),
        cnae: Set(req.cnae),
        uf_emissor: Set(req.uf_emissor.to_ascii_uppercase()),
        cnpj_emissor: Set(req.cnpj_emissor.as_deref().map(digits)),
        created_at: Set(crate::db::now()),
        updated_at: Set(None),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    record(&current_user, AuditAction::Create, MODULE, "fiscal_configs", created.id, None);
    Ok(Created(created))
}

/// PUT /api/fiscal/config/:id
pub async fn update_fiscal_config(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateFiscalConfig>,
) -> AppResult<Json<fiscal_config::Model>> {
    let current = find_or_404::<fiscal_config::Entity, _>(&*db, id, CONFIG_RESOURCE).await?;
    let mut model: fiscal_config::ActiveModel = current.into();

    if let Some(ambiente) = req.ambiente {
        require_one_of("ambiente", &ambiente, &AMBIENTES)?;
        model.ambiente = Set(ambiente);
    }
    if let Some(regime) = req.regime_tributario {
        require_one_of("regimeTributario", &regime, &REGIMES)?;
        model.regime_tributario = Set(regime);
    }
    if let Some(uf) = req.uf_emissor {
        validate_uf(&uf)?;
        model.uf_emissor = Set(uf.to_ascii_uppercase());
    }
    if let Some(next) = req.proximo_numero_nfe {
        validate_next_number(next)?;
        model.proximo_numero_nfe = Set(next);
    }
    if let Some(serie) = req.serie_nfe {
        model.serie_nfe = Set(serie);
    }
    if let Some(cnpj) = req.cnpj_emissor {
        model.cnpj_emissor = Set(Some(digits(&cnpj)));
    }
    if let Some(ie) = req.inscricao_estadual {
        model.inscricao_estadual = Set(Some(ie));
    }
    if let Some(im) = req.inscricao_municipal {
        model.inscricao_municipal = Set(Some(im));
    }
    if let Some(cnae) = req.cnae {
        model.cnae = Set(Some(cnae));
    }
    model.updated_at = Set(Some(crate::db::now()));
    let updated = model.update(&*db).await?;

    record(&current_user, AuditAction::Update, MODULE, "fiscal_configs", id, None);
    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// NF-e
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfeFilter {
    pub status: Option<String>,
    pub destinatario_id: Option<i32>,
    pub numero: Option<i32>,
    pub chave: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Monetary fields of a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NfeValues {
    pub valor_produtos: f64,
    pub valor_frete: f64,
    pub valor_seguro: f64,
    pub valor_desconto: f64,
    pub valor_outras_despesas: f64,
    #[serde(rename = "valorICMS")]
    pub valor_icms: f64,
    #[serde(rename = "valorIPI")]
    pub valor_ipi: f64,
}

impl NfeValues {
    fn validate(&self) -> AppResult<()> {
        let fields = [
            ("valorProdutos", self.valor_produtos),
            ("valorFrete", self.valor_frete),
            ("valorSeguro", self.valor_seguro),
            ("valorDesconto", self.valor_desconto),
            ("valorOutrasDespesas", self.valor_outras_despesas),
            ("valorICMS", self.valor_icms),
            ("valorIPI", self.valor_ipi),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::field(field, "Valor deve ser um número não negativo"));
            }
        }
        if self.total() < 0.0 {
            return Err(AppError::field("valorDesconto", "Desconto maior que o valor da nota"));
        }
        Ok(())
    }

    /// Products plus freight, insurance, other expenses and IPI, minus discount
    pub fn total(&self) -> f64 {
        self.valor_produtos + self.valor_frete + self.valor_seguro + self.valor_outras_despesas
            + self.valor_ipi
            - self.valor_desconto
    }

    fn apply(&self, model: &mut nfe::ActiveModel) {
        model.valor_produtos = Set(self.valor_produtos);
        model.valor_frete = Set(self.valor_frete);
        model.valor_seguro = Set(self.valor_seguro);
        model.valor_desconto = Set(self.valor_desconto);
        model.valor_outras_despesas = Set(self.valor_outras_despesas);
        model.valor_icms = Set(self.valor_icms);
        model.valor_ipi = Set(self.valor_ipi);
        model.valor_total = Set(self.total());
    }
}

impl NfeValues {
    /// Product, ICMS and IPI totals taken from the line items
    pub fn with_items(self, items: &[nfe_item::Model]) -> Self {
        let sum = |f: fn(&nfe_item::Model) -> f64| round2(items.iter().map(f).sum());
        Self {
            valor_produtos: sum(|i| i.valor_total),
            valor_icms: sum(|i| i.valor_icms),
            valor_ipi: sum(|i| i.valor_ipi),
            ..self
        }
    }
}

impl From<&nfe::Model> for NfeValues {
    fn from(m: &nfe::Model) -> Self {
        Self {
            valor_produtos: m.valor_produtos,
            valor_frete: m.valor_frete,
            valor_seguro: m.valor_seguro,
            valor_desconto: m.valor_desconto,
            valor_outras_despesas: m.valor_outras_despesas,
            valor_icms: m.valor_icms,
            valor_ipi: m.valor_ipi,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNfe {
    pub natureza_operacao: String,
    pub destinatario_id: i32,
    pub modelo_documento: Option<String>,
    pub tipo_operacao: Option<String>,
    pub finalidade: Option<String>,
    #[serde(flatten)]
    pub values: NfeValues,
    pub informacoes_adicionais: Option<String>,
    pub pedido_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNfe {
    pub natureza_operacao: Option<String>,
    pub destinatario_id: Option<i32>,
    pub tipo_operacao: Option<String>,
    pub finalidade: Option<String>,
    pub status: Option<String>,
    pub valor_produtos: Option<f64>,
    pub valor_frete: Option<f64>,
    pub valor_seguro: Option<f64>,
    pub valor_desconto: Option<f64>,
    pub valor_outras_despesas: Option<f64>,
    #[serde(rename = "valorICMS")]
    pub valor_icms: Option<f64>,
    #[serde(rename = "valorIPI")]
    pub valor_ipi: Option<f64>,
    pub informacoes_adicionais: Option<String>,
    pub pedido_id: Option<i32>,
}

impl UpdateNfe {
    fn merge(&self, current: NfeValues) -> NfeValues {
        NfeValues {
            valor_produtos: self.valor_produtos.unwrap_or(current.valor_produtos),
            valor_frete: self.valor_frete.unwrap_or(current.valor_frete),
            valor_seguro: self.valor_seguro.unwrap_or(current.valor_seguro),
            valor_desconto: self.valor_desconto.unwrap_or(current.valor_desconto),
            valor_outras_despesas: self.valor_outras_despesas.unwrap_or(current.valor_outras_despesas),
            valor_icms: self.valor_icms.unwrap_or(current.valor_icms),
            valor_ipi: self.valor_ipi.unwrap_or(current.valor_ipi),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelNfe {
    pub justificativa: String,
}

fn ensure_editable(doc: &nfe::Model, action: &str) -> AppResult<()> {
    if is_locked(&doc.status) {
        return Err(AppError::BadRequest(format!(
            "NF-e não pode ser {} pois está com status '{}'",
            action, doc.status
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Line items
// ---------------------------------------------------------------------------

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn has_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}

/// Line item fields as sent by the client. Totals and tax values are derived.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfeItemInput {
    pub produto_id: Option<i32>,
    pub codigo: String,
    pub descricao: String,
    pub ncm: String,
    pub cfop: String,
    pub unidade: String,
    pub quantidade: f64,
    pub valor_unitario: f64,
    #[serde(default)]
    pub valor_desconto: f64,
    #[serde(rename = "cstICMS")]
    pub cst_icms: Option<String>,
    #[serde(rename = "aliquotaICMS", default)]
    pub aliquota_icms: f64,
    #[serde(rename = "aliquotaIPI", default)]
    pub aliquota_ipi: f64,
    #[serde(rename = "aliquotaPIS", default)]
    pub aliquota_pis: f64,
    #[serde(rename = "aliquotaCOFINS", default)]
    pub aliquota_cofins: f64,
    pub informacoes_adicionais: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNfeItem {
    pub produto_id: Option<i32>,
    pub codigo: Option<String>,
    pub descricao: Option<String>,
    pub ncm: Option<String>,
    pub cfop: Option<String>,
    pub unidade: Option<String>,
    pub quantidade: Option<f64>,
    pub valor_unitario: Option<f64>,
    pub valor_desconto: Option<f64>,
    #[serde(rename = "cstICMS")]
    pub cst_icms: Option<String>,
    #[serde(rename = "aliquotaICMS")]
    pub aliquota_icms: Option<f64>,
    #[serde(rename = "aliquotaIPI")]
    pub aliquota_ipi: Option<f64>,
    #[serde(rename = "aliquotaPIS")]
    pub aliquota_pis: Option<f64>,
    #[serde(rename = "aliquotaCOFINS")]
    pub aliquota_cofins: Option<f64>,
    pub informacoes_adicionais: Option<String>,
}

impl UpdateNfeItem {
    fn merge(self, current: NfeItemInput) -> NfeItemInput {
        NfeItemInput {
            produto_id: self.produto_id.or(current.produto_id),
            codigo: self.codigo.unwrap_or(current.codigo),
            descricao: self.descricao.unwrap_or(current.descricao),
            ncm: self.ncm.unwrap_or(current.ncm),
            cfop: self.cfop.unwrap_or(current.cfop),
            unidade: self.unidade.unwrap_or(current.unidade),
            quantidade: self.quantidade.unwrap_or(current.quantidade),
            valor_unitario: self.valor_unitario.unwrap_or(current.valor_unitario),
            valor_desconto: self.valor_desconto.unwrap_or(current.valor_desconto),
            cst_icms: self.cst_icms.or(current.cst_icms),
            aliquota_icms: self.aliquota_icms.unwrap_or(current.aliquota_icms),
            aliquota_ipi: self.aliquota_ipi.unwrap_or(current.aliquota_ipi),
            aliquota_pis: self.aliquota_pis.unwrap_or(current.aliquota_pis),
            aliquota_cofins: self.aliquota_cofins.unwrap_or(current.aliquota_cofins),
            informacoes_adicionais: self.informacoes_adicionais.or(current.informacoes_adicionais),
        }
    }
}

impl From<&nfe_item::Model> for NfeItemInput {
    fn from(m: &nfe_item::Model) -> Self {
        Self {
            produto_id: m.produto_id,
            codigo: m.codigo.clone(),
            descricao: m.descricao.clone(),
            ncm: m.ncm.clone(),
            cfop: m.cfop.clone(),
            unidade: m.unidade.clone(),
            quantidade: m.quantidade,
            valor_unitario: m.valor_unitario,
            valor_desconto: m.valor_desconto,
            cst_icms: m.cst_icms.clone(),
            aliquota_icms: m.aliquota_icms,
            aliquota_ipi: m.aliquota_ipi,
            aliquota_pis: m.aliquota_pis,
            aliquota_cofins: m.aliquota_cofins,
            informacoes_adicionais: m.informacoes_adicionais.clone(),
        }
    }
}

/// Derived monetary values of one line item, rounded to cents
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemAmounts {
    pub valor_total: f64,
    pub valor_icms: f64,
    pub valor_ipi: f64,
    pub valor_pis: f64,
    pub valor_cofins: f64,
}

impl NfeItemInput {
    fn validate(&self) -> AppResult<()> {
        require_text("codigo", &self.codigo, "Código do item é obrigatório")?;
        require_text("descricao", &self.descricao, "Descrição do item é obrigatória")?;
        require_text("unidade", &self.unidade, "Unidade é obrigatória")?;
        if !has_digits(&self.ncm, 8) {
            return Err(AppError::field("ncm", "NCM deve ter 8 dígitos"));
        }
        if !has_digits(&self.cfop, 4) {
            return Err(AppError::field("cfop", "CFOP deve ter 4 dígitos"));
        }
        if !self.quantidade.is_finite() || self.quantidade <= 0.0 {
            return Err(AppError::field("quantidade", "Quantidade deve ser maior que zero"));
        }
        for (field, value) in [
            ("valorUnitario", self.valor_unitario),
            ("valorDesconto", self.valor_desconto),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::field(field, "Valor deve ser um número não negativo"));
            }
        }
        for (field, rate) in [
            ("aliquotaICMS", self.aliquota_icms),
            ("aliquotaIPI", self.aliquota_ipi),
            ("aliquotaPIS", self.aliquota_pis),
            ("aliquotaCOFINS", self.aliquota_cofins),
        ] {
            if !(0.0..=100.0).contains(&rate) {
                return Err(AppError::field(field, "Alíquota deve estar entre 0 e 100"));
            }
        }
        if self.valor_desconto > self.quantidade * self.valor_unitario {
            return Err(AppError::field("valorDesconto", "Desconto maior que o valor do item"));
        }
        Ok(())
    }

    /// Net value is quantity times unit price minus discount; each tax is its
    /// rate applied to the net value
    pub fn amounts(&self) -> ItemAmounts {
        let total = round2(self.quantidade * self.valor_unitario - self.valor_desconto);
        let tax = |rate: f64| round2(total * rate / 100.0);
        ItemAmounts {
            valor_total: total,
            valor_icms: tax(self.aliquota_icms),
            valor_ipi: tax(self.aliquota_ipi),
            valor_pis: tax(self.aliquota_pis),
            valor_cofins: tax(self.aliquota_cofins),
        }
    }

    fn apply(self, model: &mut nfe_item::ActiveModel) {
        let amounts = self.amounts();
        model.produto_id = Set(self.produto_id);
        model.codigo = Set(self.codigo);
        model.descricao = Set(self.descricao);
        model.ncm = Set(self.ncm);
        model.cfop = Set(self.cfop);
        model.unidade = Set(self.unidade);
        model.quantidade = Set(self.quantidade);
        model.valor_unitario = Set(self.valor_unitario);
        model.valor_desconto = Set(self.valor_desconto);
        model.valor_total = Set(amounts.valor_total);
        model.cst_icms = Set(self.cst_icms);
        model.aliquota_icms = Set(self.aliquota_icms);
        model.valor_icms = Set(amounts.valor_icms);
        model.aliquota_ipi = Set(self.aliquota_ipi);
        model.valor_ipi = Set(amounts.valor_ipi);
        model.aliquota_pis = Set(self.aliquota_pis);
        model.valor_pis = Set(amounts.valor_pis);
        model.aliquota_cofins = Set(self.aliquota_cofins);
        model.valor_cofins = Set(amounts.valor_cofins);
        model.informacoes_adicionais = Set(self.informacoes_adicionais);
    }
}

/// Position for the next item; numbers of removed items are not reused
pub fn next_item_number(items: &[nfe_item::Model]) -> i32 {
    items.iter().map(|i| i.numero_item).max().unwrap_or(0) + 1
}

/// Item change together with the document carrying the new totals
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemChange {
    pub item: nfe_item::Model,
    pub nfe: nfe::Model,
}

/// Document with its items and event log
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NfeDetail {
    #[serde(flatten)]
    pub nfe: nfe::Model,
    pub itens: Vec<nfe_item::Model>,
    pub eventos: Vec<nfe_evento::Model>,
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Event type and message for a plain update
pub fn update_event(before: &str, after: &str) -> (&'static str, String) {
    if before == after {
        (TIPO_ATUALIZACAO, "NF-e atualizada".to_string())
    } else {
        (
            TIPO_ALTERACAO_STATUS,
            format!("Status alterado de '{}' para '{}'", before, after),
        )
    }
}

async fn log_event<C: ConnectionTrait>(
    db: &C,
    nfe_id: i32,
    tipo: &str,
    mensagem: String,
    user_id: i32,
) -> Result<nfe_evento::Model, DbErr> {
    nfe_evento::ActiveModel {
        nfe_id: Set(nfe_id),
        tipo: Set(tipo.to_string()),
        status: Set(STATUS_SUCESSO.to_string()),
        mensagem: Set(mensagem),
        xml: Set(None),
        data_evento: Set(crate::db::now()),
        created_by: Set(Some(user_id)),
        ..Default::default()
    }
    .insert(db)
    .await
}

async fn lock_nfe<C: ConnectionTrait>(db: &C, id: i32) -> AppResult<nfe::Model> {
    nfe::Entity::find_by_id(id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_not_found(RESOURCE)
}

async fn items_of<C: ConnectionTrait>(db: &C, nfe_id: i32) -> Result<Vec<nfe_item::Model>, DbErr> {
    nfe_item::Entity::find()
        .filter(nfe_item::Column::NfeId.eq(nfe_id))
        .order_by_asc(nfe_item::Column::NumeroItem)
        .all(db)
        .await
}

async fn events_of<C: ConnectionTrait>(db: &C, nfe_id: i32) -> Result<Vec<nfe_evento::Model>, DbErr> {
    nfe_evento::Entity::find()
        .filter(nfe_evento::Column::NfeId.eq(nfe_id))
        .order_by_desc(nfe_evento::Column::DataEvento)
        .order_by_desc(nfe_evento::Column::Id)
        .all(db)
        .await
}

/// Store totals derived from the given items
async fn refresh_totals<C: ConnectionTrait>(
    db: &C,
    doc: nfe::Model,
    items: &[nfe_item::Model],
) -> AppResult<nfe::Model> {
    let values = NfeValues::from(&doc).with_items(items);
    values.validate()?;
    let mut model: nfe::ActiveModel = doc.into();
    values.apply(&mut model);
    model.updated_at = Set(Some(crate::db::now()));
    Ok(model.update(db).await?)
}

/// Insert a line item into an editable document
pub async fn add_item(
    db: &DatabaseConnection,
    nfe_id: i32,
    user_id: i32,
    input: NfeItemInput,
) -> AppResult<ItemChange> {
    input.validate()?;

    let txn = db.begin().await?;
    let doc = lock_nfe(&txn, nfe_id).await?;
    ensure_editable(&doc, "alterada")?;
    let mut items = items_of(&txn, nfe_id).await?;
    let numero_item = next_item_number(&items);

    let mut model = nfe_item::ActiveModel {
        nfe_id: Set(nfe_id),
        numero_item: Set(numero_item),
        created_at: Set(crate::db::now()),
        ..Default::default()
    };
    input.apply(&mut model);
    let item = model.insert(&txn).await?;
    items.push(item.clone());

    let doc = refresh_totals(&txn, doc, &items).await?;
    log_event(
        &txn,
        nfe_id,
        TIPO_ATUALIZACAO,
        format!("Item {} adicionado: {}", item.numero_item, item.descricao),
        user_id,
    )
    .await?;
    txn.commit().await?;

    Ok(ItemChange { item, nfe: doc })
}

/// Change a line item of an editable document
pub async fn update_item(
    db: &DatabaseConnection,
    item_id: i32,
    user_id: i32,
    req: UpdateNfeItem,
) -> AppResult<ItemChange> {
    let txn = db.begin().await?;
    let current = find_or_404::<nfe_item::Entity, _>(&txn, item_id, ITEM_RESOURCE).await?;
    let doc = lock_nfe(&txn, current.nfe_id).await?;
    ensure_editable(&doc, "alterada")?;

    let input = req.merge(NfeItemInput::from(&current));
    input.validate()?;
    let nfe_id = current.nfe_id;
    let mut model: nfe_item::ActiveModel = current.into();
    input.apply(&mut model);
    let item = model.update(&txn).await?;

    let items: Vec<_> = items_of(&txn, nfe_id)
        .await?
        .into_iter()
        .map(|i| if i.id == item.id { item.clone() } else { i })
        .collect();
    let doc = refresh_totals(&txn, doc, &items).await?;
    log_event(
        &txn,
        nfe_id,
        TIPO_ATUALIZACAO,
        format!("Item {} atualizado", item.numero_item),
        user_id,
    )
    .await?;
    txn.commit().await?;

    Ok(ItemChange { item, nfe: doc })
}

/// Remove a line item from an editable document; returns the document with
/// its new totals
pub async fn remove_item(db: &DatabaseConnection, item_id: i32, user_id: i32) -> AppResult<nfe::Model> {
    let txn = db.begin().await?;
    let current = find_or_404::<nfe_item::Entity, _>(&txn, item_id, ITEM_RESOURCE).await?;
    let doc = lock_nfe(&txn, current.nfe_id).await?;
    ensure_editable(&doc, "alterada")?;

    nfe_item::Entity::delete_by_id(item_id).exec(&txn).await?;
    let items: Vec<_> = items_of(&txn, current.nfe_id)
        .await?
        .into_iter()
        .filter(|i| i.id != item_id)
        .collect();
    let doc = refresh_totals(&txn, doc, &items).await?;
    log_event(
        &txn,
        current.nfe_id,
        TIPO_ATUALIZACAO,
        format!("Item {} removido", current.numero_item),
        user_id,
    )
    .await?;
    txn.commit().await?;

    Ok(doc)
}

/// Trimmed justification of 15 to 255 characters
pub fn validate_justification(text: &str) -> AppResult<String> {
    let text = text.trim();
    let len = text.chars().count();
    if !(JUSTIFICATION_MIN..=JUSTIFICATION_MAX).contains(&len) {
        return Err(AppError::field(
            "justificativa",
            format!(
                "Justificativa deve ter entre {} e {} caracteres",
                JUSTIFICATION_MIN, JUSTIFICATION_MAX
            ),
        ));
    }
    Ok(text.to_string())
}

fn validate_operation(tipo: &str, finalidade: &str) -> AppResult<()> {
    require_one_of("tipoOperacao", tipo, &["0", "1"])?;
    require_one_of("finalidade", finalidade, &["1", "2", "3", "4"])
}

/// GET /api/fiscal/nfe
pub async fn list_nfes(
    Extension(db): Extension<DbConn>,
    Query(filter): Query<NfeFilter>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Paginated<nfe::Model>>> {
    use nfe::Column;

    let params = PageParams::from(page);
    let mut query = nfe::Entity::find();
    if let Some(status) = filter.status.filter(|s| !s.is_empty()) {
        query = query.filter(Column::Status.eq(status));
    }
    if let Some(dest) = filter.destinatario_id {
        query = query.filter(Column::DestinatarioId.eq(dest));
    }
    if let Some(numero) = filter.numero {
        query = query.filter(Column::Numero.eq(numero));
    }
    if let Some(chave) = filter.chave.filter(|s| !s.is_empty()) {
        query = query.filter(Column::Chave.eq(chave));
    }
    if let Some(start) = filter.start_date {
        query = query.filter(Column::DataEmissao.gte(start.and_time(chrono::NaiveTime::MIN)));
    }
    if let Some(end) = filter.end_date.and_then(|d| d.succ_opt()) {
        query = query.filter(Column::DataEmissao.lt(end.and_time(chrono::NaiveTime::MIN)));
    }

    let column = match params.sort_by.as_deref() {
        Some("dataEmissao") => Some(Column::DataEmissao),
        Some("valorTotal") => Some(Column::ValorTotal),
        Some("status") => Some(Column::Status),
        Some("numero") => Some(Column::Numero),
        _ => None,
    };
    query = match (column, params.sort_order) {
        (Some(col), SortOrder::Asc) => query.order_by_asc(col),
        (Some(col), SortOrder::Desc) => query.order_by_desc(col),
        (None, _) => query.order_by_desc(Column::Numero),
    };

    Ok(Json(paginate_query(&*db, query, &params).await?))
}

async fn detail<C: ConnectionTrait>(db: &C, nfe: nfe::Model) -> AppResult<NfeDetail> {
    let itens = items_of(db, nfe.id).await?;
    let eventos = events_of(db, nfe.id).await?;
    Ok(NfeDetail { nfe, itens, eventos })
}

/// GET /api/fiscal/nfe/:id
pub async fn get_nfe(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<NfeDetail>> {
    let doc = find_or_404::<nfe::Entity, _>(&*db, id, RESOURCE).await?;
    Ok(Json(detail(&*db, doc).await?))
}

/// GET /api/fiscal/nfe/chave/:chave
pub async fn get_nfe_by_key(
    Extension(db): Extension<DbConn>,
    Path(chave): Path<String>,
) -> AppResult<Json<NfeDetail>> {
    if !has_digits(&chave, 44) {
        return Err(AppError::field("chave", "Chave de acesso deve ter 44 dígitos"));
    }
    let doc = nfe::Entity::find()
        .filter(nfe::Column::Chave.eq(chave))
        .one(&*db)
        .await?
        .ok_or_not_found(RESOURCE)?;
    Ok(Json(detail(&*db, doc).await?))
}

/// GET /api/fiscal/nfe/:id/eventos
pub async fn list_nfe_events(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<nfe_evento::Model>>> {
    find_or_404::<nfe::Entity, _>(&*db, id, RESOURCE).await?;
    Ok(Json(events_of(&*db, id).await?))
}

/// GET /api/fiscal/nfe/:id/itens
pub async fn list_nfe_items(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<nfe_item::Model>>> {
    find_or_404::<nfe::Entity, _>(&*db, id, RESOURCE).await?;
    Ok(Json(items_of(&*db, id).await?))
}

/// POST /api/fiscal/nfe/:id/item
pub async fn create_nfe_item(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<NfeItemInput>,
) -> AppResult<Created<ItemChange>> {
    let change = add_item(&db, id, current_user.id, req).await?;
    record(
        &current_user,
        AuditAction::Create,
        MODULE,
        "nfe_itens",
        change.item.id,
        Some(serde_json::json!({"nfeId": id, "valorTotal": change.nfe.valor_total})),
    );
    Ok(Created(change))
}

/// PATCH /api/fiscal/nfe/item/:id
pub async fn update_nfe_item(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateNfeItem>,
) -> AppResult<Json<ItemChange>> {
    let change = update_item(&db, id, current_user.id, req).await?;
    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "nfe_itens",
        id,
        Some(serde_json::json!({"nfeId": change.nfe.id, "valorTotal": change.nfe.valor_total})),
    );
    Ok(Json(change))
}

/// DELETE /api/fiscal/nfe/item/:id
pub async fn delete_nfe_item(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let doc = remove_item(&db, id, current_user.id).await?;
    record(
        &current_user,
        AuditAction::Delete,
        MODULE,
        "nfe_itens",
        id,
        Some(serde_json::json!({"nfeId": doc.id, "valorTotal": doc.valor_total})),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/fiscal/nfe
pub async fn create_nfe(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateNfe>,
) -> AppResult<Created<nfe::Model>> {
    require_text("naturezaOperacao", &req.natureza_operacao, "Natureza da operação é obrigatória")?;
    let modelo = req.modelo_documento.unwrap_or_else(|| MODELOS[0].to_string());
    require_one_of("modeloDocumento", &modelo, &MODELOS)?;
    let tipo = req.tipo_operacao.unwrap_or_else(|| "1".to_string());
    let finalidade = req.finalidade.unwrap_or_else(|| "1".to_string());
    validate_operation(&tipo, &finalidade)?;
    req.values.validate()?;

    let txn = db.begin().await?;
    let config = fiscal_config::Entity::find()
        .order_by_asc(fiscal_config::Column::Id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::BadRequest("Configuração fiscal não cadastrada".to_string()))?;
    customer::Entity::find_by_id(req.destinatario_id)
        .one(&txn)
        .await?
        .ok_or_not_found("Destinatário")?;

    let cnpj = match config.cnpj_emissor.clone().filter(|c| !c.is_empty()) {
        Some(cnpj) => cnpj,
        None => company::Entity::find()
            .one(&txn)
            .await?
            .and_then(|c| c.tax_id)
            .ok_or_else(|| AppError::BadRequest("CNPJ do emissor não configurado".to_string()))?,
    };

    let numero = config.proximo_numero_nfe;
    let issued_at = crate::db::now();
    let chave = AccessKey {
        uf: &config.uf_emissor,
        issued_at,
        cnpj: &cnpj,
        modelo: &modelo,
        serie: config.serie_nfe,
        numero,
        tp_emis: TP_EMIS_NORMAL,
        code: random_code(),
    }
    .build()?;

    let serie = config.serie_nfe;
    let mut config: fiscal_config::ActiveModel = config.into();
    config.proximo_numero_nfe = Set(numero + 1);
    config.updated_at = Set(Some(issued_at));
    config.update(&txn).await?;

    let mut model = nfe::ActiveModel {
        numero: Set(numero),
        serie: Set(serie),
        chave: Set(chave),
        data_emissao: Set(issued_at),
        status: Set(STATUS_DRAFT.to_string()),
        modelo_documento: Set(modelo),
        natureza_operacao: Set(req.natureza_operacao),
        tipo_operacao: Set(tipo),
        finalidade: Set(finalidade),
        destinatario_id: Set(req.destinatario_id),
        informacoes_adicionais: Set(req.informacoes_adicionais),
        motivo_cancelamento: Set(None),
        data_cancelamento: Set(None),
        pedido_id: Set(req.pedido_id),
        created_at: Set(issued_at),
        created_by: Set(current_user.id),
        updated_at: Set(None),
        ..Default::default()
    };
    req.values.apply(&mut model);
    let created = model.insert(&txn).await?;
    log_event(
        &txn,
        created.id,
        TIPO_CRIACAO,
        format!("NF-e {} série {} criada", created.numero, created.serie),
        current_user.id,
    )
    .await?;
    txn.commit().await?;

    tracing::info!("NF-e {} série {} created by {}", created.numero, created.serie, current_user.username);
    record(
        &current_user,
        AuditAction::Create,
        MODULE,
        "nfes",
        created.id,
        Some(serde_json::json!({"numero": created.numero, "chave": created.chave})),
    );
    Ok(Created(created))
}

/// Apply a header update to an editable document
pub async fn apply_update(
    db: &DatabaseConnection,
    id: i32,
    user_id: i32,
    req: UpdateNfe,
) -> AppResult<nfe::Model> {
    if let Some(status) = &req.status {
        require_one_of("status", status, &EDITABLE_STATUSES)?;
    }
    if let Some(natureza) = &req.natureza_operacao {
        require_text("naturezaOperacao", natureza, "Natureza da operação é obrigatória")?;
    }

    let txn = db.begin().await?;
    let current = lock_nfe(&txn, id).await?;
    ensure_editable(&current, "atualizada")?;

    let tipo = req.tipo_operacao.clone().unwrap_or_else(|| current.tipo_operacao.clone());
    let finalidade = req.finalidade.clone().unwrap_or_else(|| current.finalidade.clone());
    validate_operation(&tipo, &finalidade)?;
    if let Some(dest) = req.destinatario_id {
        customer::Entity::find_by_id(dest)
            .one(&txn)
            .await?
            .ok_or_not_found("Destinatário")?;
    }
    let items = items_of(&txn, id).await?;
    let mut values = req.merge(NfeValues::from(&current));
    if !items.is_empty() {
        values = values.with_items(&items);
    }
    values.validate()?;

    let previous_status = current.status.clone();
    let mut model: nfe::ActiveModel = current.into();
    values.apply(&mut model);
    model.tipo_operacao = Set(tipo);
    model.finalidade = Set(finalidade);
    if let Some(natureza) = req.natureza_operacao {
        model.natureza_operacao = Set(natureza);
    }
    if let Some(dest) = req.destinatario_id {
        model.destinatario_id = Set(dest);
    }
    if let Some(status) = req.status {
        model.status = Set(status);
    }
    if let Some(info) = req.informacoes_adicionais {
        model.informacoes_adicionais = Set(Some(info));
    }
    if let Some(pedido) = req.pedido_id {
        model.pedido_id = Set(Some(pedido));
    }
    model.updated_at = Set(Some(crate::db::now()));
    let updated = model.update(&txn).await?;

    let (tipo, mensagem) = update_event(&previous_status, &updated.status);
    log_event(&txn, id, tipo, mensagem, user_id).await?;
    txn.commit().await?;

    Ok(updated)
}

/// PATCH /api/fiscal/nfe/:id
pub async fn update_nfe(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateNfe>,
) -> AppResult<Json<nfe::Model>> {
    let updated = apply_update(&db, id, current_user.id, req).await?;
    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "nfes",
        id,
        Some(serde_json::json!({"status": updated.status})),
    );
    Ok(Json(updated))
}

/// POST /api/fiscal/nfe/:id/cancel
pub async fn cancel_nfe(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<CancelNfe>,
) -> AppResult<Json<nfe::Model>> {
    let justification = validate_justification(&req.justificativa)?;

    let txn = db.begin().await?;
    let current = lock_nfe(&txn, id).await?;
    match current.status.as_str() {
        STATUS_CANCELLED => return Err(AppError::BadRequest("NF-e já está cancelada".to_string())),
        STATUS_DENIED => {
            return Err(AppError::BadRequest("NF-e denegada não pode ser cancelada".to_string()))
        }
        _ => {}
    }

    let now = crate::db::now();
    let mut model: nfe::ActiveModel = current.into();
    model.status = Set(STATUS_CANCELLED.to_string());
    model.motivo_cancelamento = Set(Some(justification.clone()));
    model.data_cancelamento = Set(Some(now));
    model.updated_at = Set(Some(now));
    let updated = model.update(&txn).await?;
    log_event(
        &txn,
        id,
        TIPO_CANCELAMENTO,
        format!("NF-e cancelada: {}", justification),
        current_user.id,
    )
    .await?;
    txn.commit().await?;

    tracing::info!("NF-e {} cancelled by {}", updated.numero, current_user.username);
    record(&current_user, AuditAction::Update, MODULE, "nfes", id, Some(serde_json::json!({"status": STATUS_CANCELLED})));
    Ok(Json(updated))
}

/// DELETE /api/fiscal/nfe/:id
pub async fn delete_nfe(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let txn = db.begin().await?;
    let current = lock_nfe(&txn, id).await?;
    ensure_editable(&current, "excluída")?;
    nfe_item::Entity::delete_many()
        .filter(nfe_item::Column::NfeId.eq(id))
        .exec(&txn)
        .await?;
    nfe_evento::Entity::delete_many()
        .filter(nfe_evento::Column::NfeId.eq(id))
        .exec(&txn)
        .await?;
    nfe::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    record(&current_user, AuditAction::Delete, MODULE, "nfes", id, None);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    fn key(numero: i32) -> AccessKey<'static> {
        AccessKey {
            uf: "SP",
            issued_at: at(2024, 6, 15),
            cnpj: "12.345.678/0001-95",
            modelo: "55",
            serie: 1,
            numero,
            tp_emis: TP_EMIS_NORMAL,
            code: 87_654_321,
        }
    }

    #[test]
    fn test_check_digit() {
        assert_eq!(check_digit("3524061234567800019555001000000002187654321"), 8);
        assert_eq!(check_digit("3524061234567800019555001000000003187654321"), 5);
        assert_eq!(check_digit("3524061234567800019555001000000157187654321"), 1);
        assert_eq!(check_digit("4316090"), 5);
    }

    #[test]
    fn test_check_digit_low_remainder_is_zero() {
        // remainders 0 and 1
        assert_eq!(check_digit("3124101234567800019555001000000004112345678"), 0);
        assert_eq!(check_digit("3124101234567800019555001000000008112345678"), 0);
    }

    #[test]
    fn test_access_key_layout() {
        let chave = key(2).build().unwrap();
        assert_eq!(chave.len(), 44);
        assert_eq!(&chave[0..2], "35");
        assert_eq!(&chave[2..6], "2406");
        assert_eq!(&chave[6..20], "12345678000195");
        assert_eq!(&chave[20..22], "55");
        assert_eq!(&chave[22..25], "001");
        assert_eq!(&chave[25..34], "000000002");
        assert_eq!(&chave[34..35], "1");
        assert_eq!(&chave[35..43], "87654321");
        assert_eq!(chave, "35240612345678000195550010000000021876543218");
        assert!(is_valid_key(&chave));
    }

    #[test]
    fn test_access_key_rejects_bad_inputs() {
        let mut k = key(1);
        k.uf = "XX";
        assert!(k.build().is_err());
        let mut k = key(1);
        k.cnpj = "123";
        assert!(k.build().is_err());
        let mut k = key(1);
        k.serie = 1000;
        assert!(k.build().is_err());
        assert!(key(0).build().is_err());
    }

    #[test]
    fn test_tampered_key_is_invalid() {
        let mut chave = key(3).build().unwrap();
        chave.replace_range(43..44, if chave.ends_with('0') { "1" } else { "0" });
        assert!(!is_valid_key(&chave));
        assert!(!is_valid_key("123"));
    }

    #[test]
    fn test_random_code_fits_eight_digits() {
        for _ in 0..100 {
            assert!(random_code() < 100_000_000);
        }
    }

    #[test]
    fn test_uf_codes() {
        assert_eq!(uf_code("mg"), Some(31));
        assert_eq!(uf_code("DF"), Some(53));
        assert_eq!(uf_code(""), None);
    }

    #[test]
    fn test_justification_length() {
        tokio_test::assert_err!(validate_justification("curta demais"));
        tokio_test::assert_err!(validate_justification(&"x".repeat(256)));
        let ok = tokio_test::assert_ok!(validate_justification("  Erro no valor do frete informado  "));
        assert_eq!(ok, "Erro no valor do frete informado");
    }

    #[test]
    fn test_total_and_discount() {
        let values = NfeValues {
            valor_produtos: 100.0,
            valor_frete: 10.0,
            valor_ipi: 5.0,
            valor_desconto: 15.0,
            ..Default::default()
        };
        assert_eq!(values.total(), 100.0);
        assert!(values.validate().is_ok());
        let too_much = NfeValues {
            valor_desconto: 200.0,
            ..values
        };
        assert!(too_much.validate().is_err());
    }

    fn doc(status: &str) -> nfe::Model {
        nfe::Model {
            id: 1,
            numero: 1,
            serie: 1,
            chave: String::new(),
            data_emissao: crate::db::now(),
            status: status.to_string(),
            modelo_documento: "55".into(),
            natureza_operacao: "Venda".into(),
            tipo_operacao: "1".into(),
            finalidade: "1".into(),
            destinatario_id: 1,
            valor_total: 0.0,
            valor_produtos: 0.0,
            valor_frete: 0.0,
            valor_seguro: 0.0,
            valor_desconto: 0.0,
            valor_outras_despesas: 0.0,
            valor_icms: 0.0,
            valor_ipi: 0.0,
            informacoes_adicionais: None,
            motivo_cancelamento: None,
            data_cancelamento: None,
            pedido_id: None,
            created_at: crate::db::now(),
            created_by: 1,
            updated_at: None,
        }
    }

    fn input() -> NfeItemInput {
        NfeItemInput {
            produto_id: Some(3),
            codigo: "PRD-003".into(),
            descricao: "Tampa de alumínio".into(),
            ncm: "76129090".into(),
            cfop: "5101".into(),
            unidade: "un".into(),
            quantidade: 4.0,
            valor_unitario: 52.5,
            valor_desconto: 10.0,
            cst_icms: Some("00".into()),
            aliquota_icms: 18.0,
            aliquota_ipi: 10.0,
            aliquota_pis: 1.65,
            aliquota_cofins: 7.6,
            informacoes_adicionais: None,
        }
    }

    fn item(id: i32, numero_item: i32, valor_total: f64, valor_ipi: f64) -> nfe_item::Model {
        nfe_item::Model {
            id,
            nfe_id: 1,
            numero_item,
            produto_id: None,
            codigo: format!("IT-{}", id),
            descricao: "Item".into(),
            ncm: "76129090".into(),
            cfop: "5101".into(),
            unidade: "un".into(),
            quantidade: 1.0,
            valor_unitario: valor_total,
            valor_desconto: 0.0,
            valor_total,
            cst_icms: None,
            aliquota_icms: 0.0,
            valor_icms: 0.0,
            aliquota_ipi: 0.0,
            valor_ipi,
            aliquota_pis: 0.0,
            valor_pis: 0.0,
            aliquota_cofins: 0.0,
            valor_cofins: 0.0,
            informacoes_adicionais: None,
            created_at: crate::db::now(),
        }
    }

    fn event(tipo: &str) -> nfe_evento::Model {
        nfe_evento::Model {
            id: 1,
            nfe_id: 1,
            tipo: tipo.into(),
            status: STATUS_SUCESSO.into(),
            mensagem: String::new(),
            xml: None,
            data_evento: crate::db::now(),
            created_by: Some(1),
        }
    }

    #[test]
    fn test_locked_documents() {
        let err = ensure_editable(&doc(STATUS_AUTHORIZED), "atualizada").unwrap_err();
        assert_eq!(err.to_string(), "NF-e não pode ser atualizada pois está com status 'autorizada'");
        assert!(ensure_editable(&doc(STATUS_DRAFT), "excluída").is_ok());
    }

    #[test]
    fn test_item_amounts() {
        let amounts = input().amounts();
        assert_eq!(
            amounts,
            ItemAmounts {
                valor_total: 200.0,
                valor_icms: 36.0,
                valor_ipi: 20.0,
                valor_pis: 3.3,
                valor_cofins: 15.2,
            }
        );
        let cents = NfeItemInput {
            quantidade: 3.0,
            valor_unitario: 0.333,
            valor_desconto: 0.0,
            ..input()
        };
        assert_eq!(cents.amounts().valor_total, 1.0);
    }

    #[test]
    fn test_item_validation() {
        assert!(input().validate().is_ok());
        let cases = [
            NfeItemInput { ncm: "7612".into(), ..input() },
            NfeItemInput { cfop: "51O1".into(), ..input() },
            NfeItemInput { quantidade: 0.0, ..input() },
            NfeItemInput { valor_unitario: -1.0, ..input() },
            NfeItemInput { valor_desconto: 210.01, ..input() },
            NfeItemInput { aliquota_icms: 120.0, ..input() },
            NfeItemInput { descricao: "  ".into(), ..input() },
        ];
        for case in cases {
            assert!(matches!(case.validate(), Err(AppError::Validation { .. })), "{:?}", case);
        }
    }

    #[test]
    fn test_totals_follow_items() {
        let values = NfeValues {
            valor_produtos: 999.0,
            valor_frete: 10.0,
            valor_desconto: 5.0,
            ..Default::default()
        }
        .with_items(&[item(1, 1, 200.0, 20.0), item(2, 2, 50.25, 0.0)]);
        assert_eq!(values.valor_produtos, 250.25);
        assert_eq!(values.valor_ipi, 20.0);
        assert_eq!(values.valor_frete, 10.0);
        assert_eq!(values.total(), 275.25);

        let empty = values.with_items(&[]);
        assert_eq!(empty.valor_produtos, 0.0);
        assert_eq!(empty.total(), 5.0);
    }

    #[test]
    fn test_next_item_number() {
        assert_eq!(next_item_number(&[]), 1);
        assert_eq!(next_item_number(&[item(1, 1, 1.0, 0.0), item(3, 3, 1.0, 0.0)]), 4);
    }

    #[test]
    fn test_item_update_keeps_unset_fields() {
        let current = item(7, 2, 80.0, 0.0);
        let merged = UpdateNfeItem {
            quantidade: Some(2.0),
            aliquota_icms: Some(12.0),
            ..Default::default()
        }
        .merge(NfeItemInput::from(&current));
        assert_eq!(merged.codigo, "IT-7");
        assert_eq!(merged.valor_unitario, 80.0);
        assert_eq!(merged.amounts().valor_total, 160.0);
        assert_eq!(merged.amounts().valor_icms, 19.2);
    }

    #[test]
    fn test_update_event() {
        assert_eq!(update_event(STATUS_DRAFT, STATUS_DRAFT).0, TIPO_ATUALIZACAO);
        let (tipo, mensagem) = update_event(STATUS_DRAFT, STATUS_AUTHORIZED);
        assert_eq!(tipo, TIPO_ALTERACAO_STATUS);
        assert_eq!(mensagem, "Status alterado de 'em_digitacao' para 'autorizada'");
    }

    #[tokio::test]
    async fn test_add_item_numbers_after_existing_items() {
        let added = item(9, 2, 200.0, 20.0);
        let updated = nfe::Model {
            valor_produtos: 300.0,
            valor_ipi: 20.0,
            valor_total: 320.0,
            ..doc(STATUS_DRAFT)
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![doc(STATUS_DRAFT)]])
            .append_query_results([vec![item(4, 1, 100.0, 0.0)]])
            .append_query_results([vec![added.clone()]])
            .append_query_results([vec![updated.clone()]])
            .append_query_results([vec![event(TIPO_ATUALIZACAO)]])
            .into_connection();

        let change = add_item(&db, 1, 1, input()).await.unwrap();
        assert_eq!(change.item, added);
        assert_eq!(change.nfe, updated);
    }

    #[tokio::test]
    async fn test_items_of_locked_document_are_frozen() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![doc(STATUS_AUTHORIZED)]])
            .into_connection();
        let err = add_item(&db, 1, 1, input()).await.unwrap_err();
        assert_eq!(err.to_string(), "NF-e não pode ser alterada pois está com status 'autorizada'");

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![item(4, 1, 100.0, 0.0)]])
            .append_query_results([vec![doc(STATUS_CANCELLED)]])
            .into_connection();
        let err = remove_item(&db, 4, 1).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_invalid_item_is_rejected_before_locking() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let bad = NfeItemInput { quantidade: -1.0, ..input() };
        assert!(matches!(
            add_item(&db, 1, 1, bad).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_item_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<nfe_item::Model>::new()])
            .into_connection();
        let err = update_item(&db, 42, 1, UpdateNfeItem::default()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_change_through_update() {
        let authorized = doc(STATUS_AUTHORIZED);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![doc(STATUS_DRAFT)]])
            .append_query_results([Vec::<nfe_item::Model>::new()])
            .append_query_results([vec![authorized.clone()]])
            .append_query_results([vec![event(TIPO_ALTERACAO_STATUS)]])
            .into_connection();
        let req: UpdateNfe = serde_json::from_value(serde_json::json!({"status": "autorizada"})).unwrap();
        let updated = apply_update(&db, 1, 1, req).await.unwrap();
        assert_eq!(updated.status, STATUS_AUTHORIZED);
    }
}
