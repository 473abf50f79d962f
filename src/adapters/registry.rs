use crate::adapters::csv::CsvAdapter;
use crate::adapters::excel::ExcelAdapter;
use crate::adapters::json::JsonAdapter;
use crate::adapters::model::ModelAdapter;
use crate::adapters::object::{ObjectAdapter, ObjectSink};
use crate::adapters::sql::SqlAdapter;
use crate::adapters::storage::StorageRouter;
use crate::adapters::xml::XmlAdapter;
use crate::domain::ports::{Exporter, Importer, RecordStore};
use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Importer/exporter capability pair registered under one type tag.
#[derive(Clone)]
pub struct AdapterPair {
    pub importer: Arc<dyn Importer>,
    pub exporter: Arc<dyn Exporter>,
}

impl AdapterPair {
    pub fn new(importer: Arc<dyn Importer>, exporter: Arc<dyn Exporter>) -> Self {
        Self { importer, exporter }
    }

    /// Registers one value that implements both capabilities.
    pub fn from_adapter<A>(adapter: A) -> Self
    where
        A: Importer + Exporter + 'static,
    {
        let adapter = Arc::new(adapter);
        Self {
            importer: adapter.clone(),
            exporter: adapter,
        }
    }
}

pub struct FormatRegistry {
    adapters: RwLock<HashMap<String, AdapterPair>>,
}

impl FormatRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_builtins(
        storage: Arc<StorageRouter>,
        store: Arc<dyn RecordStore>,
        objects: ObjectSink,
    ) -> Self {
        let registry = Self::empty();
        registry.register("csv", AdapterPair::from_adapter(CsvAdapter::new(storage.clone())));
        registry.register("json", AdapterPair::from_adapter(JsonAdapter::new(storage.clone())));
        registry.register("xml", AdapterPair::from_adapter(XmlAdapter::new(storage.clone())));
        registry.register("sql", AdapterPair::from_adapter(SqlAdapter::new(storage.clone())));

        let excel = AdapterPair::from_adapter(ExcelAdapter::new(storage));
        registry.register("excel", excel.clone());
        registry.register("spreadsheet", excel);

        let model = AdapterPair::from_adapter(ModelAdapter::new(store));
        registry.register("model", model.clone());
        registry.register("relational-model", model);

        let object = AdapterPair::from_adapter(ObjectAdapter::new(objects));
        registry.register("object", object.clone());
        registry.register("typed-object", object);
        registry
    }

    /// Adds or replaces the adapter for `tag`; replacements shadow built-ins.
    pub fn register(&self, tag: &str, pair: AdapterPair) {
        let mut adapters = self.adapters.write().unwrap_or_else(PoisonError::into_inner);
        if adapters.insert(tag.to_ascii_lowercase(), pair).is_some() {
            tracing::debug!("Adapter for '{}' replaced", tag);
        }
    }

    pub fn lookup(&self, tag: &str) -> Result<AdapterPair> {
        let adapters = self.adapters.read().unwrap_or_else(PoisonError::into_inner);
        adapters
            .get(&tag.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| EtlError::UnsupportedType {
                tag: tag.to_string(),
            })
    }

    pub fn tags(&self) -> Vec<String> {
        let adapters = self.adapters.read().unwrap_or_else(PoisonError::into_inner);
        let mut tags: Vec<String> = adapters.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_builtins(
            Arc::new(StorageRouter::with_defaults()),
            Arc::new(crate::adapters::model::MemoryStore::new()),
            ObjectSink::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Record, Source};
    use crate::domain::ports::{ChunkWriter, RecordStream};

    struct FixedImporter;

    impl Importer for FixedImporter {
        fn import(&self, _source: &Source) -> Result<RecordStream> {
            Ok(RecordStream::counted(vec![Record::from_pairs([("custom", true)])]))
        }
    }

    impl Exporter for FixedImporter {
        fn open(&self, destination: &str) -> Result<Box<dyn ChunkWriter + '_>> {
            Err(EtlError::unwritable(destination, "read only"))
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = FormatRegistry::default();
        assert!(registry.lookup("CSV").is_ok());
        assert!(registry.lookup("Typed-Object").is_ok());
        assert!(matches!(
            registry.lookup("unknown"),
            Err(EtlError::UnsupportedType { .. })
        ));
        let tags = registry.tags();
        assert_eq!(tags.len(), 10);
        assert_eq!(tags.first().map(String::as_str), Some("csv"));
    }

    #[test]
    fn test_register_overrides_builtin() {
        let registry = FormatRegistry::default();
        registry.register("csv", AdapterPair::from_adapter(FixedImporter));

        let pair = registry.lookup("csv").unwrap();
        let records: Vec<Record> = pair
            .importer
            .import(&Source::location("ignored.csv"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![Record::from_pairs([("custom", true)])]);
        assert!(pair.exporter.export(vec![], "x.csv").is_err());
    }
}
