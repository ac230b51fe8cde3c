//! Collectible card, stored through its own `Storable` schema.

use std::collections::BTreeMap;

use keypath_store::{Data, Storable, TranslationError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Card {
    pub name: String,
    pub rarity: i64,
    pub tags: Vec<String>,
}

impl Card {
    pub fn new(name: &str, rarity: i64, tags: &[&str]) -> Self {
        Card {
            name: name.to_string(),
            rarity,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Storable for Card {
    fn to_data(&self) -> Result<Data, TranslationError> {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Data::from(self.name.as_str()));
        map.insert("rarity".to_string(), Data::from(self.rarity));
        map.insert(
            "tags".to_string(),
            Data::List(self.tags.iter().map(|t| Data::from(t.as_str())).collect()),
        );
        Ok(Data::Map(map))
    }

    fn from_data(&mut self, data: &Data) -> Result<(), TranslationError> {
        self.name = data.field("name")?.expect_str()?.to_string();
        self.rarity = data.field("rarity")?.expect_number()?.as_i64();
        self.tags = match data.optional_field("tags")? {
            Some(tags) => tags
                .expect_list()?
                .iter()
                .map(|t| t.expect_str().map(str::to_string))
                .collect::<Result<_, _>>()?,
            None => Vec::new(),
        };
        Ok(())
    }
}
