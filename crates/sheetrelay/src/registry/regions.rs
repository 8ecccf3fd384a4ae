//! Built-in list of known region names.
//!
//! Used for region-column discovery when the configuration does not supply its
//! own list. Every group's region keys are added on top of this at load time.

/// The 81 provinces of Türkiye, in their display spelling.
pub const DEFAULT_KNOWN_REGIONS: &[&str] = &[
    "Adana", "Adıyaman", "Afyonkarahisar", "Ağrı", "Aksaray", "Amasya", "Ankara",
    "Antalya", "Ardahan", "Artvin", "Aydın", "Balıkesir", "Bartın", "Batman",
    "Bayburt", "Bilecik", "Bingöl", "Bitlis", "Bolu", "Burdur", "Bursa", "Çanakkale",
    "Çankırı", "Çorum", "Denizli", "Diyarbakır", "Düzce", "Edirne", "Elazığ",
    "Erzincan", "Erzurum", "Eskişehir", "Gaziantep", "Giresun", "Gümüşhane",
    "Hakkâri", "Hatay", "Iğdır", "Isparta", "İstanbul", "İzmir", "Kahramanmaraş",
    "Karabük", "Karaman", "Kars", "Kastamonu", "Kayseri", "Kırıkkale", "Kırklareli",
    "Kırşehir", "Kilis", "Kocaeli", "Konya", "Kütahya", "Malatya", "Manisa",
    "Mardin", "Mersin", "Muğla", "Muş", "Nevşehir", "Niğde", "Ordu", "Osmaniye",
    "Rize", "Sakarya", "Samsun", "Siirt", "Sinop", "Sivas", "Şanlıurfa", "Şırnak",
    "Tekirdağ", "Tokat", "Trabzon", "Tunceli", "Uşak", "Van", "Yalova", "Yozgat",
    "Zonguldak",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_region;
    use std::collections::HashSet;

    #[test]
    fn test_default_regions_complete_and_distinct() {
        assert_eq!(DEFAULT_KNOWN_REGIONS.len(), 81);
        let normalized: HashSet<String> = DEFAULT_KNOWN_REGIONS
            .iter()
            .map(|r| normalize_region(r))
            .collect();
        assert_eq!(normalized.len(), 81);
        assert!(normalized.contains("HAKKARI"));
        assert!(normalized.contains("IGDIR"));
    }
}
