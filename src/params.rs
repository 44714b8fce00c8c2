use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{CursorError, Result};

/// A single bound value. Positional parameters are named `"1"`, `"2"`, ...
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub value: serde_json::Value,
    /// Optional SQL type hint such as `bigint` or `datetime2`.
    #[serde(rename = "type", default)]
    pub param_type: Option<String>,
}

impl QueryParam {
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            param_type: None,
        }
    }

    /// Lookup key: leading `:`/`@` stripped, lowercased.
    fn key(&self) -> String {
        normalize_name(&self.name)
    }

    fn position(&self) -> Option<usize> {
        self.name.parse::<usize>().ok().filter(|&n| n > 0)
    }
}

fn normalize_name(name: &str) -> String {
    name.trim_start_matches(&[':', '@'][..]).to_lowercase()
}

/// Ordered parameter list owned by a cursor.
///
/// Values are copied in when the cursor is configured, so later changes to
/// the caller's data never reach a deferred execution.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Params(Vec<QueryParam>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Bind a named parameter, replacing an earlier binding of the same name.
    pub fn bind(self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.push(QueryParam::new(name, value))
    }

    pub fn bind_typed(
        self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
        param_type: impl Into<String>,
    ) -> Self {
        let mut param = QueryParam::new(name, value);
        param.param_type = Some(param_type.into());
        self.push(param)
    }

    /// Bind the next `?` placeholder.
    pub fn positional(self, value: impl Into<serde_json::Value>) -> Self {
        let next = self.0.iter().filter_map(QueryParam::position).max().unwrap_or(0) + 1;
        self.push(QueryParam::new(next.to_string(), value))
    }

    fn push(mut self, param: QueryParam) -> Self {
        let key = param.key();
        match self.0.iter_mut().find(|p| p.key() == key) {
            Some(existing) => *existing = param,
            None => self.0.push(param),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&QueryParam> {
        let key = normalize_name(name);
        self.0.iter().find(|p| p.key() == key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryParam> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[QueryParam] {
        &self.0
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Params::new(), |params, (k, v)| params.bind(k, v))
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a QueryParam;
    type IntoIter = std::slice::Iter<'a, QueryParam>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ── Placeholder rewriting (:name, @name, ? → @P1) ────────────

fn emit(result: &mut String, order: &mut Vec<usize>, idx: usize) {
    order.push(idx);
    result.push_str(&format!("@P{}", order.len()));
}

fn is_sql_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_sql_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Copy a quoted run starting at `chars[i]` (the opening quote) through its
/// closing quote. A doubled closing quote is an escape.
fn copy_quoted(chars: &[char], mut i: usize, close: char, out: &mut String) -> usize {
    out.push(chars[i]);
    i += 1;
    while i < chars.len() {
        out.push(chars[i]);
        if chars[i] == close {
            i += 1;
            if i < chars.len() && chars[i] == close {
                out.push(chars[i]);
                i += 1;
            } else {
                return i;
            }
        } else {
            i += 1;
        }
    }
    i
}

/// Rewrite `:name`, `@name` and `?` placeholders to positional `@P1`,
/// `@P2`, ... markers. Returns the rewritten SQL and, for each marker, the
/// index of the parameter it binds.
///
/// Unknown `@name` markers are kept verbatim since they may be T-SQL local
/// variables. Unknown `:name` markers and unmatched `?` markers fail.
pub fn rewrite_placeholders(sql: &str, params: &Params) -> Result<(String, Vec<usize>)> {
    let mut name_to_idx: HashMap<String, usize> = HashMap::new();
    let mut pos_to_idx: HashMap<usize, usize> = HashMap::new();
    for (i, param) in params.iter().enumerate() {
        name_to_idx.entry(param.key()).or_insert(i);
        if let Some(n) = param.position() {
            pos_to_idx.entry(n).or_insert(i);
        }
    }

    let chars: Vec<char> = sql.chars().collect();
    let len = chars.len();
    let mut result = String::with_capacity(sql.len());
    let mut order: Vec<usize> = Vec::new();
    let mut next_positional = 0;
    let mut i = 0;

    while i < len {
        match chars[i] {
            '\'' => {
                i = copy_quoted(&chars, i, '\'', &mut result);
                continue;
            }
            '"' => {
                i = copy_quoted(&chars, i, '"', &mut result);
                continue;
            }
            '[' => {
                i = copy_quoted(&chars, i, ']', &mut result);
                continue;
            }
            '-' if i + 1 < len && chars[i + 1] == '-' => {
                while i < len && chars[i] != '\n' {
                    result.push(chars[i]);
                    i += 1;
                }
                continue;
            }
            '/' if i + 1 < len && chars[i + 1] == '*' => {
                result.push_str("/*");
                i += 2;
                while i < len && !(chars[i] == '*' && i + 1 < len && chars[i + 1] == '/') {
                    result.push(chars[i]);
                    i += 1;
                }
                if i < len {
                    result.push_str("*/");
                    i += 2;
                }
                continue;
            }
            '@' if i + 1 < len && chars[i + 1] == '@' => {
                result.push_str("@@");
                i += 2;
                while i < len && is_sql_ident_char(chars[i]) {
                    result.push(chars[i]);
                    i += 1;
                }
                continue;
            }
            ':' if i + 1 < len && chars[i + 1] == ':' => {
                result.push_str("::");
                i += 2;
                continue;
            }
            marker @ (':' | '@') if i + 1 < len && is_sql_ident_start(chars[i + 1]) => {
                let start = i + 1;
                let mut end = start;
                while end < len && is_sql_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match name_to_idx.get(&name.to_lowercase()) {
                    Some(&idx) => emit(&mut result, &mut order, idx),
                    None if marker == ':' => {
                        return Err(CursorError::Binding(format!(
                            "No value bound for parameter :{name}"
                        )));
                    }
                    None => {
                        result.push('@');
                        result.push_str(&name);
                    }
                }
                i = end;
                continue;
            }
            '?' => {
                next_positional += 1;
                let idx = pos_to_idx.get(&next_positional).copied().ok_or_else(|| {
                    CursorError::Binding(format!(
                        "No value bound for positional parameter {next_positional}"
                    ))
                })?;
                emit(&mut result, &mut order, idx);
                i += 1;
                continue;
            }
            _ => {}
        }

        result.push(chars[i]);
        i += 1;
    }

    Ok((result, order))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_placeholders_returns_unchanged() {
        let (sql, order) = rewrite_placeholders("SELECT * FROM t", &Params::new()).unwrap();
        assert_eq!(sql, "SELECT * FROM t");
        assert!(order.is_empty());
    }

    #[test]
    fn rewrite_colon_param() {
        let params = Params::new().bind("active", true);
        let (sql, order) =
            rewrite_placeholders("SELECT id, name FROM users WHERE active = :active", &params)
                .unwrap();
        assert_eq!(sql, "SELECT id, name FROM users WHERE active = @P1");
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn rewrite_at_params() {
        let params = Params::new().bind("a", 1).bind("b", 2);
        let (sql, order) = rewrite_placeholders("SELECT @b, @a", &params).unwrap();
        assert_eq!(sql, "SELECT @P1, @P2");
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn rewrite_positional_params() {
        let params = Params::new().positional(10).positional("x");
        let (sql, order) = rewrite_placeholders("SELECT * FROM t WHERE a = ? AND b = ?", &params)
            .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = @P1 AND b = @P2");
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn bound_name_prefix_is_ignored() {
        let params = Params::new().bind(":id", 7);
        let (sql, _) = rewrite_placeholders("SELECT :id", &params).unwrap();
        assert_eq!(sql, "SELECT @P1");
    }

    #[test]
    fn preserves_quoted_text_and_comments() {
        let params = Params::new().bind("name", "x");
        let (sql, order) = rewrite_placeholders(
            "SELECT ':name', [a:name], \"@name\" -- :name\n, :name /* ? */",
            &params,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT ':name', [a:name], \"@name\" -- :name\n, @P1 /* ? */"
        );
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn preserves_escaped_quotes() {
        let params = Params::new().bind("v", 1);
        let (sql, _) = rewrite_placeholders("SELECT 'it''s :v', :v", &params).unwrap();
        assert_eq!(sql, "SELECT 'it''s :v', @P1");
    }

    #[test]
    fn preserves_system_variables_and_scope_operator() {
        let params = Params::new().bind("val", 1);
        let (sql, _) =
            rewrite_placeholders("SELECT @@IDENTITY, geography::Point(1, 2, 4326), @val", &params)
                .unwrap();
        assert_eq!(sql, "SELECT @@IDENTITY, geography::Point(1, 2, 4326), @P1");
    }

    #[test]
    fn unknown_at_name_is_kept() {
        let (sql, order) =
            rewrite_placeholders("DECLARE @local INT; SELECT @local", &Params::new()).unwrap();
        assert_eq!(sql, "DECLARE @local INT; SELECT @local");
        assert!(order.is_empty());
    }

    #[test]
    fn unknown_colon_name_is_a_binding_error() {
        let err = rewrite_placeholders("SELECT :missing", &Params::new()).unwrap_err();
        assert!(matches!(err, CursorError::Binding(ref m) if m.contains(":missing")));
    }

    #[test]
    fn missing_positional_is_a_binding_error() {
        let params = Params::new().positional(1);
        let err = rewrite_placeholders("SELECT ?, ?", &params).unwrap_err();
        assert!(matches!(err, CursorError::Binding(_)));
    }

    #[test]
    fn case_insensitive_matching() {
        let params = Params::new().bind("Name", "a");
        let (sql, order) = rewrite_placeholders("SELECT :name, @NAME", &params).unwrap();
        assert_eq!(sql, "SELECT @P1, @P2");
        assert_eq!(order, vec![0, 0]);
    }

    #[test]
    fn rebinding_replaces_value() {
        let params = Params::new().bind("id", 1).bind("ID", 2);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get(":id").unwrap().value, serde_json::json!(2));
    }

    #[test]
    fn params_from_json_array() {
        let params: Params = serde_json::from_str(
            r#"[{"name": "id", "value": 5, "type": "bigint"}, {"name": "flag", "value": true}]"#,
        )
        .unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("id").unwrap().param_type.as_deref(), Some("bigint"));
        assert!(params.get("flag").unwrap().param_type.is_none());
    }

    #[test]
    fn params_from_pairs() {
        let params: Params = [("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(params.len(), 2);
        assert_eq!(params.as_slice()[1].name, "b");
    }
}
