//! Wavefront OBJ scenes with their MTL libraries.

use std::path::Path;

use anyhow::Context;

use super::source::{
    ColorProperty, ScalarProperty, SceneDecoder, SourceMaterial, SourceMesh, SourceNode,
    SourceScene, TextureKind,
};

/// MTL statements tobj does not interpret, and the texture kind each names.
const EXTRA_TEXTURE_KEYS: [(&str, TextureKind); 7] = [
    ("norm", TextureKind::Normals),
    ("map_Ke", TextureKind::Emissive),
    ("disp", TextureKind::Displacement),
    ("refl", TextureKind::Reflection),
    ("map_Pr", TextureKind::DiffuseRoughness),
    ("map_Pm", TextureKind::Metalness),
    ("map_ao", TextureKind::AmbientOcclusion),
];

#[derive(Copy, Clone, Debug, Default)]
pub struct ObjDecoder;

impl SceneDecoder for ObjDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<SourceScene> {
        // Faces stay polygons; the importer fans them.
        let (models, materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: false,
                single_index: true,
                ..Default::default()
            },
        )
        .with_context(|| format!("Could not load {}", path.display()))?;

        let mut materials: Vec<SourceMaterial> = match materials {
            Ok(materials) => materials.iter().map(convert_material).collect(),
            Err(e) => {
                log::warn!("No materials for {}: {}", path.display(), e);
                Vec::new()
            }
        };
        let default_material = materials.len();
        materials.push(SourceMaterial::new("default"));

        let meshes: Vec<SourceMesh> = models
            .into_iter()
            .map(|model| {
                let mesh = model.mesh;
                let material = mesh
                    .material_id
                    .filter(|id| *id < default_material)
                    .unwrap_or(default_material);
                SourceMesh {
                    name: model.name,
                    positions: mesh
                        .positions
                        .chunks_exact(3)
                        .map(|p| [p[0], p[1], p[2]])
                        .collect(),
                    normals: (!mesh.normals.is_empty()).then(|| {
                        mesh.normals
                            .chunks_exact(3)
                            .map(|n| [n[0], n[1], n[2]])
                            .collect()
                    }),
                    tex_coords: (!mesh.texcoords.is_empty()).then(|| {
                        mesh.texcoords
                            .chunks_exact(2)
                            .map(|t| [t[0], t[1]])
                            .collect()
                    }),
                    faces: split_faces(&mesh.indices, &mesh.face_arities),
                    material,
                }
            })
            .collect();

        Ok(SourceScene {
            root: SourceNode {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                meshes: (0..meshes.len()).collect(),
                ..Default::default()
            },
            meshes,
            materials,
        })
    }
}

/// Cuts the flat index list into polygons. No arities means all triangles.
fn split_faces(indices: &[u32], arities: &[u32]) -> Vec<Vec<u32>> {
    if arities.is_empty() {
        return indices.chunks_exact(3).map(<[u32]>::to_vec).collect();
    }
    let mut faces = Vec::with_capacity(arities.len());
    let mut start = 0;
    for &arity in arities {
        let end = (start + arity as usize).min(indices.len());
        faces.push(indices[start..end].to_vec());
        start = end;
    }
    faces
}

/// The file part of a texture statement; options such as `-bm 0.5` precede it.
fn texture_file(statement: &str) -> Option<&str> {
    statement.split_whitespace().last()
}

fn convert_material(material: &tobj::Material) -> SourceMaterial {
    let mut source = SourceMaterial::new(&material.name);
    if let Some(diffuse) = material.diffuse {
        source = source.with_color(ColorProperty::Diffuse, diffuse);
    }
    if let Some(specular) = material.specular {
        source = source.with_color(ColorProperty::Specular, specular);
    }
    if let Some(shininess) = material.shininess {
        source = source.with_scalar(ScalarProperty::Shininess, shininess);
    }
    if let Some(dissolve) = material.dissolve {
        source = source.with_scalar(ScalarProperty::Opacity, dissolve);
    }
    if let Some(ior) = material.optical_density {
        source = source.with_scalar(ScalarProperty::RefractiveIndex, ior);
    }
    if let Some(emissive) = material.unknown_param.get("Ke").and_then(|v| parse_color(v)) {
        source = source.with_color(ColorProperty::Emissive, emissive);
    }

    let known = [
        (&material.diffuse_texture, TextureKind::Diffuse),
        (&material.specular_texture, TextureKind::Specular),
        (&material.ambient_texture, TextureKind::Ambient),
        // tobj reads map_Bump and bump into normal_texture
        (&material.normal_texture, TextureKind::Height),
        (&material.shininess_texture, TextureKind::Shininess),
        (&material.dissolve_texture, TextureKind::Opacity),
    ];
    for (statement, kind) in known {
        if let Some(file) = statement.as_deref().and_then(texture_file) {
            source.textures.insert(kind, file.to_string());
        }
    }
    for (key, kind) in EXTRA_TEXTURE_KEYS {
        if let Some(file) = material.unknown_param.get(key).and_then(|v| texture_file(v)) {
            source.textures.insert(kind, file.to_string());
        }
    }
    source
}

fn parse_color(value: &str) -> Option<[f32; 3]> {
    let mut parts = value.split_whitespace().map(str::parse::<f32>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(r)), Some(Ok(g)), Some(Ok(b))) => Some([r, g, b]),
        (Some(Ok(v)), None, None) => Some([v, v, v]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faces_follow_arities() {
        let faces = split_faces(&[0, 1, 2, 3, 4, 5, 6], &[4, 3]);
        assert_eq!(faces, vec![vec![0, 1, 2, 3], vec![4, 5, 6]]);
        let faces = split_faces(&[0, 1, 2, 2, 1, 3], &[]);
        assert_eq!(faces, vec![vec![0, 1, 2], vec![2, 1, 3]]);
    }

    #[test]
    fn texture_options_are_skipped() {
        assert_eq!(texture_file("-bm 0.3 bricks_n.png"), Some("bricks_n.png"));
        assert_eq!(texture_file("wood.jpg"), Some("wood.jpg"));
        assert_eq!(texture_file("  "), None);
    }

    #[test]
    fn loads_quad_with_material() {
        let dir = std::env::temp_dir().join(format!("view-ngin-obj-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("quad.mtl"),
            "newmtl panel\nKd 0.2 0.4 0.6\nNs 50\nmap_Kd panel.png\nrefl chrome.png\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("quad.obj"),
            "mtllib quad.mtl\no quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nusemtl panel\nf 1 2 3 4\n",
        )
        .unwrap();

        let scene = ObjDecoder.decode(&dir.join("quad.obj")).unwrap();
        assert_eq!(scene.meshes.len(), 1);
        let mesh = &scene.meshes[0];
        assert_eq!(mesh.positions.len(), 4);
        assert_eq!(mesh.faces, vec![vec![0, 1, 2, 3]]);
        assert!(mesh.normals.is_none());

        let material = &scene.materials[mesh.material];
        assert_eq!(material.name, "panel");
        assert_eq!(material.color(ColorProperty::Diffuse, [0.0; 3]), [0.2, 0.4, 0.6]);
        assert_eq!(material.scalar(ScalarProperty::Shininess, 0.0), 50.0);
        assert_eq!(material.texture(TextureKind::Diffuse), Some("panel.png"));
        assert_eq!(material.texture(TextureKind::Reflection), Some("chrome.png"));
        assert_eq!(scene.root.meshes, vec![0]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
