//! # Stage Catalog
//!
//! TOML description of the stage pipeline, used to seed an empty store.
//!
//! ```toml
//! [[stage]]
//! name = "Coleta de Documentos"
//! order = 2
//!
//! [[stage.requirement]]
//! name = "CAR"
//! field_key = "car"
//! project_types = []    # empty: every project type
//! ```

use crate::primitives::MAX_NAME_LENGTH;
use crate::types::bounded_text;
use crate::{FieldKey, PipelineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A whole pipeline description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCatalog {
    #[serde(default, rename = "stage")]
    pub stages: Vec<CatalogStage>,
}

/// One stage entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStage {
    pub name: String,
    pub order: u32,
    #[serde(default, rename = "requirement")]
    pub requirements: Vec<CatalogRequirement>,
}

/// One checklist item of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRequirement {
    pub name: String,
    pub field_key: String,
    #[serde(default)]
    pub project_types: Vec<u64>,
}

impl StageCatalog {
    /// Parse and validate a catalog.
    pub fn from_toml_str(raw: &str) -> Result<Self, PipelineError> {
        let catalog: Self =
            toml::from_str(raw).map_err(|e| PipelineError::InvalidCatalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check names, orders and keys before anything is written.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut orders = BTreeSet::new();
        for stage in &self.stages {
            bounded_text("name", &stage.name, MAX_NAME_LENGTH)?;
            if stage.order == 0 {
                return Err(PipelineError::InvalidOrder);
            }
            if !orders.insert(stage.order) {
                return Err(PipelineError::DuplicateStageOrder(stage.order));
            }
            let mut keys = BTreeSet::new();
            for req in &stage.requirements {
                bounded_text("name", &req.name, MAX_NAME_LENGTH)?;
                let key = FieldKey::parse(&req.field_key)?;
                if !keys.insert(key.clone()) {
                    return Err(PipelineError::DuplicateCatalogKey {
                        order: stage.order,
                        key: key.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The seven-stage pipeline the office runs by default.
    #[must_use]
    pub fn default_catalog() -> Self {
        fn req(name: &str, key: &str) -> CatalogRequirement {
            CatalogRequirement {
                name: name.to_string(),
                field_key: key.to_string(),
                project_types: Vec::new(),
            }
        }
        fn stage(name: &str, order: u32, requirements: Vec<CatalogRequirement>) -> CatalogStage {
            CatalogStage {
                name: name.to_string(),
                order,
                requirements,
            }
        }

        Self {
            stages: vec![
                stage("Cadastro", 1, vec![]),
                stage(
                    "Coleta de Documentos",
                    2,
                    vec![
                        req("CCU / Título", "ccu_titulo"),
                        req("Saldo IAGRO", "saldo_iagro"),
                        req("CAR", "car"),
                    ],
                ),
                stage(
                    "Desenvolvimento do Projeto",
                    3,
                    vec![req("Projeto implementado", "projeto_implementado")],
                ),
                stage(
                    "Coletar Assinaturas",
                    4,
                    vec![req("Projeto assinado", "projeto_assinado")],
                ),
                stage(
                    "Protocolo CENOP",
                    5,
                    vec![req("Projeto protocolado", "projeto_protocolado")],
                ),
                stage(
                    "Instrumento de Crédito",
                    6,
                    vec![
                        req("Assinatura na agência", "assinatura_agencia"),
                        req("Upload do contrato", "upload_contrato"),
                    ],
                ),
                stage(
                    "Projeto Creditado",
                    7,
                    vec![req("Comprovante de serviço pago", "comprovante_servico_pago")],
                ),
            ],
        }
    }
}
