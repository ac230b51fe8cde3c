mod config;
mod data;
mod database;
mod error;
mod executor;
mod manager;
mod translator;
mod tree;

pub mod storage;

pub use config::{BackendKind, DatabaseConfig, StoreConfig};
pub use data::{Data, Number};
pub use database::{DataMap, DataTree, Database, DatabaseState};
pub use error::{ConfigError, DatabaseError, ExecutorError, TaskError, TranslationError};
pub use executor::{ExecutorConfig, ExecutorStats, KeyedExecutor, PanicHandler, TaskHandle};
pub use manager::DatabaseManager;
pub use storage::{
    Backend, Durability, FileBackend, LoadParam, LoadParamKind, MemoryBackend, StorageUnit,
    UnitKind,
};
pub use translator::{
    BooleanTranslator, ByteTranslator, CharTranslator, DataTranslator, DoubleTranslator,
    FloatTranslator, IntegerTranslator, ListTranslator, LongTranslator, MapTranslator,
    SerdeTranslator, SetTranslator, ShortTranslator, Storable, StorableTranslator,
    StringTranslator, Translator,
};
pub use tree::{Map, PathTree, Tree, TreeMap};
