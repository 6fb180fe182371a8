//! The fixed, ordered set of fields extracted from every résumé.
//!
//! A [`FieldSchema`] is built once and shared (behind an `Arc`) by every
//! component that needs it: the prompt builder iterates it to describe each
//! field, the response parser uses it to complete and filter decoded maps, and
//! the reconciler uses it to guarantee every record has exactly its key set.
//! Iteration order is the declaration order, so prompts are reproducible.

use crate::error::ExtractError;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// One extractable attribute: a stable key and the instruction shown to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: String,
    pub instruction: String,
}

/// Immutable ordered mapping from field key to extraction instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    /// Build a schema from `(key, instruction)` pairs, preserving their order.
    ///
    /// Keys must be non-empty and unique; instructions must be non-empty.
    pub fn new<K, I>(fields: impl IntoIterator<Item = (K, I)>) -> Result<Self, ExtractError>
    where
        K: Into<String>,
        I: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut specs = Vec::new();

        for (key, instruction) in fields {
            let key = key.into().trim().to_string();
            let instruction = instruction.into().trim().to_string();
            if key.is_empty() {
                return Err(ExtractError::InvalidSchema("field key must not be empty".into()));
            }
            if instruction.is_empty() {
                return Err(ExtractError::InvalidSchema(format!(
                    "field '{key}' has an empty instruction"
                )));
            }
            if !seen.insert(key.clone()) {
                return Err(ExtractError::InvalidSchema(format!("duplicate field key '{key}'")));
            }
            specs.push(FieldSpec { key, instruction });
        }

        if specs.is_empty() {
            return Err(ExtractError::InvalidSchema("schema declares no fields".into()));
        }

        Ok(Self { fields: specs })
    }

    /// Decode a schema from a JSON object `{"key": "instruction", ...}`.
    ///
    /// Object order is kept, so the file controls prompt order. A key that
    /// appears twice is rejected like in [`FieldSchema::new`].
    pub fn from_json_str(json: &str) -> Result<Self, ExtractError> {
        let pairs: SchemaPairs = serde_json::from_str(json)
            .map_err(|e| ExtractError::InvalidSchema(format!("expected a JSON object of strings: {e}")))?;
        Self::new(pairs.0)
    }

    /// Read and decode a schema file (see [`FieldSchema::from_json_str`]).
    pub fn from_json_file(path: &Path) -> Result<Self, ExtractError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExtractError::InvalidSchema(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// The default Brazilian résumé schema: personal data, contact, documents,
    /// objectives, address, and the main education entry.
    pub fn resume() -> Self {
        Self {
            fields: RESUME_FIELDS
                .iter()
                .map(|(key, instruction)| FieldSpec {
                    key: (*key).to_string(),
                    instruction: (*instruction).to_string(),
                })
                .collect(),
        }
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f.key == key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::resume()
    }
}

const RESUME_FIELDS: &[(&str, &str)] = &[
    ("nome", "Nome completo do candidato. Mantenha acentos e a grafia original."),
    ("email", "Endereço de e-mail no formato usuario@dominio.com. Se houver vários, use o principal."),
    ("cpf", "CPF no formato 123.456.789-00."),
    ("celular", "Celular (9 dígitos) no formato (XX)XXXXX-XXXX."),
    ("telefone", "Telefone fixo (8 dígitos) no formato (XX)XXXX-XXXX."),
    ("idade", "Idade em anos, no formato 'XX anos'. Se houver apenas a data de nascimento, informe a data de nascimento."),
    ("pis", "Número do PIS/PASEP (11 dígitos)."),
    ("rg", "Número do RG/Identidade, no formato encontrado no documento."),
    ("ctps", "Número da Carteira de Trabalho (CTPS)."),
    ("habilitacao", "Categoria da CNH (A, B, AB, C, D, E, etc.)."),
    ("estado_civil", "Estado civil: solteiro(a), casado(a), divorciado(a), viúvo(a), união estável, etc."),
    ("sexo", "Sexo, como descrito no documento (Masculino, Feminino, ...)."),
    ("objetivos_profissionais", "Texto da seção de objetivos profissionais, preservando o conteúdo original."),
    ("resumo_profissional", "Resumo ou perfil profissional, incluindo habilidades e experiências relevantes."),
    ("pretensao_salarial", "Pretensão salarial no formato original (ex.: R$ 1.000,00)."),
    ("uf", "Sigla do estado de residência com 2 letras maiúsculas (SP, RJ, MG, ...)."),
    ("cidade", "Cidade de residência, com a grafia original."),
    ("cep", "CEP no formato XXXXX-XXX."),
    ("logradouro", "Logradouro do endereço, incluindo o tipo (Rua, Av., Travessa, ...)."),
    ("numero", "Número do imóvel; apenas números ou 's/n'."),
    ("complemento", "Complemento do endereço (apartamento, bloco, casa, ...), com as abreviações originais."),
    ("nivel_ensino", "Maior nível de ensino: Fundamental, Médio, Técnico, Superior, Pós-graduação, Mestrado, Doutorado."),
    ("situacao", "Situação desse nível de ensino: Completo, Incompleto, Cursando, etc."),
    ("curso", "Nome do curso principal (graduação, técnico ou principal formação)."),
    ("serie", "Série, período ou semestre atual (ex.: 2º ano, 5º semestre)."),
    ("inicio_mes", "Mês de início do curso principal (nome do mês ou 01-12)."),
    ("inicio_ano", "Ano de início do curso principal com 4 dígitos."),
    ("fim_mes", "Mês de conclusão ou previsão de conclusão (nome do mês ou 01-12)."),
    ("fim_ano", "Ano de conclusão ou previsão de conclusão com 4 dígitos."),
    ("instituicao", "Nome completo da instituição de ensino do curso principal."),
    ("carga_horaria", "Carga horária total do curso, em horas (ex.: 360h)."),
];

/// Every `(key, instruction)` entry of a JSON object, duplicates included.
struct SchemaPairs(Vec<(String, String)>);

impl<'de> Deserialize<'de> for SchemaPairs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = SchemaPairs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object of strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SchemaPairs, A::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, String>()? {
                    pairs.push(entry);
                }
                Ok(SchemaPairs(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_schema_order_is_stable() {
        let schema = FieldSchema::resume();
        assert_eq!(schema.len(), 31);
        let keys: Vec<&str> = schema.keys().collect();
        assert_eq!(&keys[..3], &["nome", "email", "cpf"]);
        assert_eq!(keys.last(), Some(&"carga_horaria"));
        assert!(schema.contains("cidade"));
        assert!(!schema.contains("salario"));
    }

    #[test]
    fn resume_schema_has_unique_keys() {
        let schema = FieldSchema::resume();
        let unique: HashSet<&str> = schema.keys().collect();
        assert_eq!(unique.len(), schema.len());
    }

    #[test]
    fn duplicate_keys_rejected() {
        let err = FieldSchema::new([("nome", "a"), ("nome", "b")]).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "got: {err}");
    }

    #[test]
    fn empty_schema_rejected() {
        let err = FieldSchema::new(Vec::<(String, String)>::new()).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidSchema(_)));
    }

    #[test]
    fn empty_instruction_rejected() {
        assert!(FieldSchema::new([("nome", "   ")]).is_err());
    }

    #[test]
    fn json_schema_keeps_file_order() {
        let schema =
            FieldSchema::from_json_str(r#"{"zeta": "last letter", "alpha": "first letter"}"#)
                .unwrap();
        let keys: Vec<&str> = schema.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn json_schema_rejects_duplicate_keys() {
        let err = FieldSchema::from_json_str(r#"{"nome": "Nome", "email": "E-mail", "nome": "Outro"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("duplicate field key 'nome'"), "got: {err}");
    }

    #[test]
    fn json_schema_rejects_non_strings() {
        assert!(FieldSchema::from_json_str(r#"{"nome": 3}"#).is_err());
        assert!(FieldSchema::from_json_str("[]").is_err());
    }
}
