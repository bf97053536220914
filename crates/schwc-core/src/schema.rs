/// Arrow schemas for the annotation spreadsheets.
pub mod annotation {
    use arrow::datatypes::{DataType, Field, Schema};

    pub const ID: &str = "ID";
    pub const TIMESTAMP: &str = "DataHora";
    pub const COMPUTER: &str = "Computador";
    pub const USER: &str = "Usuário";
    pub const HOMOLOGATION: &str = "Homologação";
    pub const ATTRIBUTE: &str = "Atributo";
    pub const VALUE: &str = "Valor";
    pub const OUTCOME: &str = "Situação";

    /// Column order of every annotation file.
    pub const COLUMNS: [&str; 8] = [
        ID,
        TIMESTAMP,
        COMPUTER,
        USER,
        HOMOLOGATION,
        ATTRIBUTE,
        VALUE,
        OUTCOME,
    ];

    /// All columns are text; typed interpretation happens in `AnnotationRecord`.
    pub fn annotation_schema() -> Schema {
        Schema::new(
            COLUMNS
                .iter()
                .map(|name| Field::new(*name, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        )
    }
}

/// Column names of the published product catalog.
pub mod catalog {
    pub const HOMOLOGATION_NUMBER: &str = "Número de Homologação";
    pub const HOMOLOGATION_DATE: &str = "Data da Homologação";
    pub const CATEGORY: &str = "Categoria do Produto";
    pub const MANUFACTURER: &str = "Nome do Fabricante";
    pub const MODEL: &str = "Modelo";
    pub const PRODUCT_TYPE: &str = "Tipo do Produto";

    /// Format of `Data da Homologação`.
    pub const DATE_FORMAT: &str = "%d/%m/%Y";
}

/// Arrow schema for the append-only search history.
pub mod history {
    use arrow::datatypes::{DataType, Field, Schema};

    /// Every column is nullable so older single-column logs can be carried forward.
    pub fn search_history_schema() -> Schema {
        Schema::new(vec![
            Field::new("query", DataType::Utf8, true),
            Field::new("status_code", DataType::Int32, true),
            Field::new("searched_at", DataType::Utf8, true),
            Field::new("raw_contents", DataType::Utf8, true),
        ])
    }
}
