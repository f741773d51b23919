use serde::{Deserialize, Serialize};

/// A selectable model persona
///
/// `system_instructions` is sent verbatim in the setup message; nothing
/// here interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_instructions: String,
}

impl Persona {
    /// Built-in general-purpose voice assistant
    pub fn default_assistant() -> Self {
        Self {
            id: "assistant".to_string(),
            name: "Assistant".to_string(),
            description: "General-purpose voice assistant".to_string(),
            system_instructions: "You are a helpful voice assistant. Keep answers short and \
                                  conversational, and ask a clarifying question when a request \
                                  is ambiguous."
                .to_string(),
        }
    }
}

/// Personas available for new sessions
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    personas: Vec<Persona>,
}

impl PersonaCatalog {
    /// Catalog from configured personas; falls back to the default assistant
    /// when none are configured. Later duplicates of an id are ignored.
    pub fn new(personas: Vec<Persona>) -> Self {
        let mut unique: Vec<Persona> = Vec::with_capacity(personas.len());
        for persona in personas {
            if unique.iter().any(|p| p.id == persona.id) {
                tracing::warn!("Duplicate persona id ignored: {}", persona.id);
                continue;
            }
            unique.push(persona);
        }

        if unique.is_empty() {
            unique.push(Persona::default_assistant());
        }

        Self { personas: unique }
    }

    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// First configured persona
    pub fn default_persona(&self) -> &Persona {
        &self.personas[0]
    }

    pub fn list(&self) -> &[Persona] {
        &self.personas
    }
}

impl Default for PersonaCatalog {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(id: &str) -> Persona {
        Persona {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: String::new(),
            system_instructions: format!("You are {}.", id),
        }
    }

    #[test]
    fn test_empty_catalog_has_default_assistant() {
        let catalog = PersonaCatalog::default();
        assert_eq!(catalog.list().len(), 1);
        assert_eq!(catalog.default_persona().id, "assistant");
        assert!(catalog.get("assistant").is_some());
    }

    #[test]
    fn test_lookup_and_duplicates() {
        let catalog = PersonaCatalog::new(vec![persona("tutor"), persona("coach"), persona("tutor")]);
        assert_eq!(catalog.list().len(), 2);
        assert_eq!(catalog.default_persona().id, "tutor");
        assert_eq!(catalog.get("coach").unwrap().system_instructions, "You are coach.");
        assert!(catalog.get("missing").is_none());
    }
}
