use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::math;

/// Energy and macronutrient vector. Calories in kcal, the rest in grams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Macros {
    #[serde(deserialize_with = "non_negative")]
    pub calories: f64,
    #[serde(deserialize_with = "non_negative")]
    pub protein: f64,
    #[serde(deserialize_with = "non_negative")]
    pub carbs: f64,
    #[serde(deserialize_with = "non_negative")]
    pub fat: f64,
}

impl Macros {
    pub fn new(calories: f64, protein: f64, carbs: f64, fat: f64) -> Self {
        Self {
            calories,
            protein,
            carbs,
            fat,
        }
        .clamped()
    }

    /// NaN and negative components become zero.
    pub fn clamped(self) -> Self {
        Self {
            calories: clamp(self.calories),
            protein: clamp(self.protein),
            carbs: clamp(self.carbs),
            fat: clamp(self.fat),
        }
    }

    pub fn approx_eq(&self, other: &Macros) -> bool {
        const EPS: f64 = 1e-6;
        (self.calories - other.calories).abs() <= EPS
            && (self.protein - other.protein).abs() <= EPS
            && (self.carbs - other.carbs).abs() <= EPS
            && (self.fat - other.fat).abs() <= EPS
    }
}

impl std::ops::Add for Macros {
    type Output = Macros;

    fn add(self, rhs: Macros) -> Macros {
        Macros {
            calories: self.calories + rhs.calories,
            protein: self.protein + rhs.protein,
            carbs: self.carbs + rhs.carbs,
            fat: self.fat + rhs.fat,
        }
        .clamped()
    }
}

fn clamp(v: f64) -> f64 {
    if v.is_nan() || v < 0.0 {
        0.0
    } else {
        v
    }
}

fn non_negative<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(clamp(Option::<f64>::deserialize(d)?.unwrap_or_default()))
}

/// One food in a draft or a committed log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    pub name: String,
    /// Quantity plus unit, e.g. "150g" or "1 medium".
    pub serving_size: String,
    #[serde(default)]
    pub macros: Macros,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub micros: Option<BTreeMap<String, f64>>,
}

impl FoodItem {
    pub fn new(name: impl Into<String>, serving_size: impl Into<String>, macros: Macros) -> Self {
        Self {
            name: name.into(),
            serving_size: serving_size.into(),
            macros: macros.clamped(),
            micros: None,
        }
    }

    /// Placeholder the user fills in by hand.
    pub fn blank() -> Self {
        Self::new("New item", "1 serving", Macros::default())
    }

    /// Replaces the serving text. A quantity change with the same unit rescales
    /// the macros proportionally; a unit change leaves them alone since there is
    /// no density to convert with.
    pub fn set_serving(&mut self, text: &str) {
        let old = math::parse_serving(&self.serving_size);
        let new = math::parse_serving(text);

        if old.same_unit(&new) && old.quantity > 0.0 && old.quantity != new.quantity {
            self.macros = math::rescale(self.macros, new.quantity / old.quantity);
        }
        self.serving_size = math::format_serving(new.quantity, &new.unit);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

/// A committed meal. `id` is assigned once and is the key in every store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealLog {
    pub id: String,
    /// Epoch millis.
    pub timestamp: i64,
    pub image_ref: String,
    #[serde(default)]
    pub items: Vec<FoodItem>,
    #[serde(default)]
    pub total_macros: Macros,
    pub meal_type: MealType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl MealLog {
    pub fn totals_consistent(&self) -> bool {
        math::sum(&self.items).approx_eq(&self.total_macros)
    }

    /// Recomputes `total_macros` from the items.
    pub fn with_recomputed_totals(mut self) -> Self {
        self.total_macros = math::sum(&self.items);
        self
    }
}
