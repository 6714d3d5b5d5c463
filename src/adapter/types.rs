use crate::adapter::error::AdapterResult;
use crate::adapter::value::Record;
use crate::database::DatabaseResult;

/// Input and output of `create`: a single record or a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Record> for OneOrMany<Record> {
    fn from(record: Record) -> Self {
        OneOrMany::One(record)
    }
}

impl From<Vec<Record>> for OneOrMany<Record> {
    fn from(records: Vec<Record>) -> Self {
        OneOrMany::Many(records)
    }
}

/// Result of dropping a collection. The definition and the documents are
/// removed by two independent writes, so either one may fail alone.
#[derive(Clone, Debug, PartialEq)]
pub struct DropOutcome {
    pub definition: DatabaseResult<()>,
    pub documents: DatabaseResult<()>,
}

impl DropOutcome {
    pub fn definition_removed(&self) -> bool {
        self.definition.is_ok()
    }

    pub fn documents_removed(&self) -> bool {
        self.documents.is_ok()
    }

    pub fn is_complete(&self) -> bool {
        self.definition_removed() && self.documents_removed()
    }

    /// Collapses the outcome, reporting the definition failure first.
    pub fn into_result(self) -> AdapterResult<()> {
        self.definition?;
        self.documents?;
        Ok(())
    }
}
