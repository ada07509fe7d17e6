//! Row filter builder for the tabular REST endpoints

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Column selection, equality filters and ordering for a table request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    select: Option<String>,
    filters: Vec<(String, String)>,
    order: Option<(String, Order)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns to return, including embedded relations such as `*,organizations(*)`
    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    /// Keep rows whose `column` equals `value`
    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters
            .push((column.to_string(), format!("eq.{}", value.to_string())));
        self
    }

    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order = Some((column.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    /// Query-string pairs in request order
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();

        if let Some(select) = &self.select {
            params.push(("select".to_string(), select.clone()));
        }

        params.extend(self.filters.iter().cloned());

        if let Some((column, order)) = &self.order {
            let direction = match order {
                Order::Ascending => "asc",
                Order::Descending => "desc",
            };
            params.push(("order".to_string(), format!("{}.{}", column, direction)));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        params
    }
}
